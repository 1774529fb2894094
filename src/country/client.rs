use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::config::ApiConfig;
use crate::error::FetchError;

use super::api_types::ApiCountry;
use super::types::Country;

/// Fields requested from the API; everything else is dropped server-side.
const FIELDS: &str =
  "name,capital,languages,currencies,alpha2Code,alpha3Code,population,subregion,region,callingCodes,latlng";

/// Remote source of country records.
///
/// Returned records carry `last_updated = 0`; the cache stamps them on write.
pub trait CountrySource: Send + Sync {
  /// Every country the API knows.
  fn fetch_all(&self) -> impl Future<Output = Result<Vec<Country>, FetchError>> + Send;

  /// One country by alpha-2 or alpha-3 code, `None` if unknown.
  fn fetch_one(&self, code: &str) -> impl Future<Output = Result<Option<Country>, FetchError>> + Send;
}

/// REST Countries API client
#[derive(Clone)]
pub struct CountryClient {
  client: Client,
  base_url: Url,
}

impl CountryClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(concat!("countrydex/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    // A trailing slash keeps the last path segment when joining endpoints
    let mut base = config.base_url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;

    Ok(Self { client, base_url })
  }

  fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
    self.base_url.join(path).map_err(FetchError::network)
  }

  /// GET `url` and decode a list of countries. `Ok(None)` on 404; callers
  /// decide whether that means "unknown code" or a broken endpoint.
  async fn get_countries(&self, mut url: Url, extra: &[(&str, &str)]) -> Result<Option<Vec<ApiCountry>>, FetchError> {
    {
      let mut query = url.query_pairs_mut();
      query.append_pair("fields", FIELDS);
      for (key, value) in extra {
        query.append_pair(key, value);
      }
    }

    tracing::debug!(%url, "GET");
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| FetchError::network(format!("GET {}: {}", url, e)))?;

    match response.status() {
      StatusCode::NOT_FOUND => return Ok(None),
      status if !status.is_success() => {
        return Err(FetchError::Network(format!("GET {}: HTTP {}", url, status)));
      }
      _ => {}
    }

    let countries = response
      .json::<Vec<ApiCountry>>()
      .await
      .map_err(|e| FetchError::network(format!("Failed to decode countries: {}", e)))?;

    Ok(Some(countries))
  }
}

impl CountrySource for CountryClient {
  async fn fetch_all(&self) -> Result<Vec<Country>, FetchError> {
    let url = self.endpoint("all")?;
    let countries = self
      .get_countries(url.clone(), &[])
      .await?
      .ok_or_else(|| FetchError::Network(format!("GET {}: HTTP {}", url, StatusCode::NOT_FOUND)))?;

    Ok(countries.into_iter().map(|c| c.into_country(0)).collect())
  }

  async fn fetch_one(&self, code: &str) -> Result<Option<Country>, FetchError> {
    let url = self.endpoint("alpha")?;
    let countries = self.get_countries(url, &[("codes", code)]).await?;

    Ok(
      countries
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|c| c.into_country(0)),
    )
  }
}

/// Minimal HTTP/1.1 server answering every request with one canned response.
#[cfg(test)]
pub(crate) mod stub {
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;
  use tokio::sync::mpsc;

  pub(crate) struct StubServer {
    pub base_url: String,
    requests: mpsc::UnboundedReceiver<String>,
  }

  impl StubServer {
    /// Request line of the next request received, e.g. `GET /v2/all?... HTTP/1.1`
    pub async fn next_request(&mut self) -> Option<String> {
      self.requests.recv().await
    }
  }

  pub(crate) async fn serve(status: u16, body: &'static str) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, requests) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      while let Ok((mut socket, _)) = listener.accept().await {
        let tx = tx.clone();
        tokio::spawn(async move {
          let mut head = Vec::new();
          let mut buf = [0u8; 1024];
          while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
              Ok(0) | Err(_) => return,
              Ok(n) => head.extend_from_slice(&buf[..n]),
            }
          }
          let head = String::from_utf8_lossy(&head);
          let _ = tx.send(head.lines().next().unwrap_or_default().to_string());

          let response = format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
          );
          let _ = socket.write_all(response.as_bytes()).await;
          let _ = socket.shutdown().await;
        });
      }
    });

    StubServer {
      base_url: format!("http://{}/v2", addr),
      requests,
    }
  }
}
