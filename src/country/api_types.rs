//! Serde-deserializable types matching the REST Countries API responses.
//!
//! These types are separate from domain types so that the wire format's
//! quirks (missing fields, explicit nulls, camelCase) stay out of the cache.

use serde::{Deserialize, Deserializer};

use super::types::{Country, Currency, Language};

/// Treat both a missing field and an explicit `null` as the type's default.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLanguage {
  #[serde(default, deserialize_with = "nullable")]
  pub name: String,
  #[serde(default, deserialize_with = "nullable")]
  pub native_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiCurrency {
  #[serde(default, deserialize_with = "nullable")]
  pub code: String,
  #[serde(default, deserialize_with = "nullable")]
  pub name: String,
  #[serde(default, deserialize_with = "nullable")]
  pub symbol: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCountry {
  #[serde(default, deserialize_with = "nullable")]
  pub name: String,
  #[serde(default, deserialize_with = "nullable")]
  pub capital: String,
  #[serde(default, deserialize_with = "nullable")]
  pub languages: Vec<ApiLanguage>,
  #[serde(default, deserialize_with = "nullable")]
  pub currencies: Vec<ApiCurrency>,
  #[serde(default, deserialize_with = "nullable")]
  pub alpha2_code: String,
  #[serde(default, deserialize_with = "nullable")]
  pub alpha3_code: String,
  #[serde(default, deserialize_with = "nullable")]
  pub population: i64,
  #[serde(default, deserialize_with = "nullable")]
  pub subregion: String,
  #[serde(default, deserialize_with = "nullable")]
  pub region: String,
  #[serde(default, deserialize_with = "nullable")]
  pub calling_codes: Vec<String>,
  #[serde(default, deserialize_with = "nullable")]
  pub latlng: Vec<f64>,
}

impl ApiCountry {
  /// Convert to a cache record stamped with `fetched_at` (epoch millis).
  pub fn into_country(self, fetched_at: i64) -> Country {
    let region = if self.subregion.is_empty() {
      self.region
    } else {
      self.subregion
    };

    Country {
      alpha3: self.alpha3_code,
      alpha2: self.alpha2_code,
      name: self.name,
      capital: self.capital,
      population: self.population,
      region,
      languages: self
        .languages
        .into_iter()
        .map(|l| Language {
          name: l.name,
          native_name: l.native_name,
        })
        .collect(),
      currencies: self
        .currencies
        .into_iter()
        .map(|c| Currency {
          code: c.code,
          name: c.name,
          symbol: c.symbol,
        })
        .collect(),
      calling_code: normalize_calling_code(self.calling_codes.first().map(String::as_str)),
      latitude: self.latlng.first().copied().unwrap_or(0.0),
      longitude: self.latlng.get(1).copied().unwrap_or(0.0),
      last_updated: fetched_at,
    }
  }
}

/// "33" -> "+33"; blank entries become empty.
fn normalize_calling_code(raw: Option<&str>) -> String {
  match raw.map(str::trim) {
    None | Some("") => String::new(),
    Some(code) if code.starts_with('+') => code.to_string(),
    Some(code) => format!("+{}", code),
  }
}
