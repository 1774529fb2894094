//! Country repository that wraps the remote client with transparent caching.

use chrono::Duration;
use color_eyre::Result;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::info;

use crate::cache::{CacheLayer, CachePolicy, CountryStore, SqliteStorage};
use crate::config::Config;
use crate::error::FetchError;
use crate::resource::Resource;

use super::client::{CountryClient, CountrySource};
use super::types::Country;

/// Summary of what the local cache holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
  pub countries: usize,
  /// Rows at or past the validity window
  pub stale: usize,
  pub oldest_update: Option<i64>,
  pub favorites: usize,
}

/// Single entry point for country data.
///
/// Every call is independent: concurrent requests for the same code each hit
/// the network when the policy says so.
pub struct CountryRepository<R, S: CountryStore> {
  remote: Arc<R>,
  cache: CacheLayer<S>,
}

impl CountryRepository<CountryClient, SqliteStorage> {
  /// Build the client and open the cache described by `config`.
  pub fn open(config: &Config, runtime: Handle) -> Result<Self> {
    let remote = CountryClient::new(&config.api)?;
    let storage = SqliteStorage::open(&config.cache_path()?)?;
    let cache = CacheLayer::new(storage, runtime)
      .with_validity(Duration::hours(config.cache.validity_hours));

    Ok(Self::new(remote, cache))
  }
}

impl<R: CountrySource + 'static, S: CountryStore + 'static> CountryRepository<R, S> {
  pub fn new(remote: R, cache: CacheLayer<S>) -> Self {
    Self {
      remote: Arc::new(remote),
      cache,
    }
  }

  /// Live stream of all countries.
  pub fn countries(&self, policy: CachePolicy) -> BoxStream<'static, Resource<Vec<Country>>> {
    let remote = Arc::clone(&self.remote);
    self
      .cache
      .watch_all(policy, move || async move { remote.fetch_all().await })
  }

  /// Live stream of one country by alpha-3 or alpha-2 code.
  pub fn country(&self, code: &str, policy: CachePolicy) -> BoxStream<'static, Resource<Country>> {
    let code = normalize_code(code);
    let remote = Arc::clone(&self.remote);
    let lookup = code.clone();
    self
      .cache
      .watch_one(&code, policy, move || async move { remote.fetch_one(&lookup).await })
  }

  /// All countries, resolved once.
  pub async fn load_countries(&self, policy: CachePolicy) -> Result<Vec<Country>, FetchError> {
    self
      .cache
      .load_all(policy, || self.remote.fetch_all())
      .await
  }

  /// One country, resolved once.
  pub async fn load_country(&self, code: &str, policy: CachePolicy) -> Result<Country, FetchError> {
    let code = normalize_code(code);
    self
      .cache
      .load_one(&code, policy, || self.remote.fetch_one(&code))
      .await
  }

  /// Search cached countries by name, capital or code.
  pub async fn search(&self, query: &str) -> Result<Vec<Country>, FetchError> {
    let query = query.to_string();
    self.cache.blocking(move |s| s.search(&query)).await
  }

  /// Mark or unmark a cached country as favorite. Returns the country.
  pub async fn set_favorite(&self, code: &str, favorite: bool) -> Result<Country, FetchError> {
    let code = normalize_code(code);
    let lookup = code.clone();
    let country = self
      .cache
      .blocking(move |s| s.country(&lookup))
      .await?
      .ok_or(FetchError::NotFound(code))?;

    let alpha3 = country.alpha3.clone();
    let now = self.cache.now_millis();
    self
      .cache
      .blocking(move |s| s.set_favorite(&alpha3, favorite, now))
      .await?;
    info!(alpha3 = %country.alpha3, favorite, "Updated favorite");

    Ok(country)
  }

  pub async fn is_favorite(&self, code: &str) -> Result<bool, FetchError> {
    let code = normalize_code(code);
    self
      .cache
      .blocking(move |s| match s.country(&code)? {
        Some(country) => s.is_favorite(&country.alpha3),
        None => Ok(false),
      })
      .await
  }

  /// Cached favorite countries, ordered by name.
  pub async fn favorites(&self) -> Result<Vec<Country>, FetchError> {
    self.cache.blocking(|s| s.favorites()).await
  }

  pub async fn status(&self) -> Result<CacheStatus, FetchError> {
    let threshold = self.cache.now_millis() - self.cache.validity().num_milliseconds();
    self
      .cache
      .blocking(move |s| {
        let countries = s.all_countries()?;
        Ok(CacheStatus {
          countries: countries.len(),
          stale: s.stale_count(threshold)?,
          oldest_update: countries.iter().map(|c| c.last_updated).min(),
          favorites: s.favorites()?.len(),
        })
      })
      .await
  }

  /// Drop every cached country. Favorite marks are kept.
  pub async fn clear(&self) -> Result<(), FetchError> {
    self.cache.blocking(|s| s.clear()).await?;
    info!("Cleared country cache");
    Ok(())
  }
}

impl<R, S: CountryStore> Clone for CountryRepository<R, S> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      cache: self.cache.clone(),
    }
  }
}

fn normalize_code(code: &str) -> String {
  code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::ManualClock;
  use futures::StreamExt;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;
  use tokio::sync::Barrier;

  const NOW: i64 = 1_700_000_000_000;
  const DAY: i64 = 24 * 60 * 60 * 1000;

  /// Remote that serves a fixed set of countries and counts requests.
  #[derive(Default)]
  struct FakeSource {
    countries: Mutex<Vec<Country>>,
    offline: bool,
    calls: AtomicUsize,
    /// Every fetch waits here before answering
    gate: Option<Arc<Barrier>>,
  }

  impl FakeSource {
    fn serving(countries: Vec<Country>) -> Self {
      Self {
        countries: Mutex::new(countries),
        ..Default::default()
      }
    }

    async fn answer<T>(&self, pick: impl FnOnce(&[Country]) -> T) -> Result<T, FetchError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(gate) = &self.gate {
        gate.wait().await;
      }
      if self.offline {
        return Err(FetchError::network("offline"));
      }
      let countries = self.countries.lock().unwrap();
      Ok(pick(&countries))
    }
  }

  impl CountrySource for FakeSource {
    async fn fetch_all(&self) -> Result<Vec<Country>, FetchError> {
      self.answer(|all| all.to_vec()).await
    }

    async fn fetch_one(&self, code: &str) -> Result<Option<Country>, FetchError> {
      self
        .answer(|all| {
          all
            .iter()
            .find(|c| c.alpha3 == code || c.alpha2 == code)
            .cloned()
        })
        .await
    }
  }

  fn country(alpha3: &str, name: &str) -> Country {
    Country {
      alpha3: alpha3.to_string(),
      alpha2: alpha3[..2].to_string(),
      name: name.to_string(),
      capital: format!("{} City", name),
      calling_code: "+1".to_string(),
      ..Default::default()
    }
  }

  fn repository(source: FakeSource) -> CountryRepository<FakeSource, SqliteStorage> {
    let cache = CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), Handle::current())
      .with_clock(Arc::new(ManualClock::at(NOW)));
    CountryRepository::new(source, cache)
  }

  #[tokio::test]
  async fn test_countries_stream_starts_loading_then_fetched_rows() {
    let repo = repository(FakeSource::serving(vec![country("FRA", "France")]));

    let first_two: Vec<_> = repo.countries(CachePolicy::CacheFirst).take(2).collect().await;

    assert!(first_two[0].is_loading());
    assert_eq!(first_two[1].data().unwrap()[0].alpha3, "FRA");
    assert_eq!(first_two[1].data().unwrap()[0].last_updated, NOW);
  }

  #[tokio::test]
  async fn test_country_code_is_case_insensitive() {
    let repo = repository(FakeSource::serving(vec![country("FRA", "France")]));

    let france = repo.load_country(" fr ", CachePolicy::CacheFirst).await.unwrap();
    assert_eq!(france.alpha3, "FRA");

    let cached = repo.load_country("fra", CachePolicy::CacheOnly).await.unwrap();
    assert_eq!(cached, france);
    assert_eq!(repo.remote.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_country_stream_unknown_code_ends_with_not_found() {
    let repo = repository(FakeSource::serving(vec![]));

    let emissions: Vec<_> = repo.country("XYZ", CachePolicy::NetworkFirst).collect().await;

    assert_eq!(
      emissions,
      vec![Resource::Loading, Resource::Error(FetchError::NotFound("XYZ".to_string()))]
    );
  }

  #[tokio::test]
  async fn test_concurrent_misses_are_not_coalesced() {
    let gate = Arc::new(Barrier::new(2));
    let repo = repository(FakeSource {
      countries: Mutex::new(vec![country("FRA", "France")]),
      gate: Some(gate),
      ..Default::default()
    });

    let (a, b) = tokio::join!(
      repo.load_country("FRA", CachePolicy::CacheFirst),
      repo.load_country("FRA", CachePolicy::CacheFirst),
    );

    assert_eq!(a.unwrap().alpha3, "FRA");
    assert_eq!(b.unwrap().alpha3, "FRA");
    assert_eq!(repo.remote.calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_offline_cache_first_without_cache_is_network_error() {
    let repo = repository(FakeSource {
      offline: true,
      ..Default::default()
    });

    let result = repo.load_countries(CachePolicy::CacheFirst).await;
    assert!(matches!(result, Err(FetchError::Network(_))));
  }

  #[tokio::test]
  async fn test_search_reads_cache_only() {
    let repo = repository(FakeSource::serving(vec![
      country("FRA", "France"),
      country("FIN", "Finland"),
    ]));
    repo.load_countries(CachePolicy::CacheFirst).await.unwrap();

    let hits = repo.search("fin").await.unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].alpha3, "FIN");
    assert_eq!(repo.remote.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_favorites_round_trip() {
    let repo = repository(FakeSource::serving(vec![
      country("FRA", "France"),
      country("DEU", "Germany"),
    ]));
    repo.load_countries(CachePolicy::CacheFirst).await.unwrap();

    let marked = repo.set_favorite("de", true).await.unwrap();
    assert_eq!(marked.alpha3, "DEU");
    assert!(repo.is_favorite("DEU").await.unwrap());
    assert!(!repo.is_favorite("FRA").await.unwrap());

    let favorites = repo.favorites().await.unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].name, "Germany");

    repo.set_favorite("DEU", false).await.unwrap();
    assert!(repo.favorites().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_favorite_of_uncached_country_is_not_found() {
    let repo = repository(FakeSource::default());

    let result = repo.set_favorite("FRA", true).await;
    assert_eq!(result, Err(FetchError::NotFound("FRA".to_string())));
  }

  #[tokio::test]
  async fn test_status_counts_stale_rows() {
    let repo = repository(FakeSource::default());
    let mut old = country("FRA", "France");
    old.last_updated = NOW - DAY;
    let mut fresh = country("DEU", "Germany");
    fresh.last_updated = NOW - DAY + 1;
    repo.cache.storage().replace_all(&[old, fresh]).unwrap();

    let status = repo.status().await.unwrap();

    assert_eq!(
      status,
      CacheStatus {
        countries: 2,
        stale: 1,
        oldest_update: Some(NOW - DAY),
        favorites: 0,
      }
    );
  }

  #[tokio::test]
  async fn test_clear_empties_cache() {
    let repo = repository(FakeSource::serving(vec![country("FRA", "France")]));
    repo.load_countries(CachePolicy::CacheFirst).await.unwrap();

    repo.clear().await.unwrap();

    let result = repo.load_countries(CachePolicy::CacheOnly).await;
    assert_eq!(result, Err(FetchError::EmptyCache));
  }

  #[tokio::test]
  async fn test_missing_list_endpoint_falls_back_without_touching_cache() {
    let server = crate::country::client::stub::serve(404, r#"{"status": 404}"#).await;
    let remote = CountryClient::new(&crate::config::ApiConfig {
      base_url: server.base_url.clone(),
      timeout_secs: 5,
    })
    .unwrap();
    let cache = CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), Handle::current())
      .with_clock(Arc::new(ManualClock::at(NOW)));
    let repo = CountryRepository::new(remote, cache);

    let mut stale = country("FRA", "France");
    stale.last_updated = NOW - 2 * DAY;
    repo.cache.storage().replace_all(&[stale.clone()]).unwrap();

    let served = repo.load_countries(CachePolicy::NetworkFirst).await;
    assert_eq!(served, Ok(vec![stale.clone()]));

    let forced = repo.load_countries(CachePolicy::ForceRefresh).await;
    assert!(matches!(forced, Err(FetchError::Network(_))));

    assert_eq!(repo.cache.storage().all_countries().unwrap(), vec![stale]);
  }
}
