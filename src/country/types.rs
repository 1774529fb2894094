use serde::{Deserialize, Serialize};

/// A spoken language of a country
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Language {
  pub name: String,
  pub native_name: String,
}

/// A currency in use in a country
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Currency {
  pub code: String,
  pub name: String,
  pub symbol: String,
}

/// Country record as stored in the local cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Country {
  /// ISO 3166-1 alpha-3 code, primary key
  pub alpha3: String,
  /// ISO 3166-1 alpha-2 code
  pub alpha2: String,
  pub name: String,
  pub capital: String,
  pub population: i64,
  pub region: String,
  pub languages: Vec<Language>,
  pub currencies: Vec<Currency>,
  /// International dialing prefix, e.g. "+33"; empty when unknown
  pub calling_code: String,
  pub latitude: f64,
  pub longitude: f64,
  /// When this record was written to the cache (epoch millis)
  pub last_updated: i64,
}

impl Country {
  /// Whether the record carries every field the cache treats as required.
  ///
  /// Records written by older fetches can lack a calling code; those are
  /// re-fetched under cache-first even when they are still fresh.
  pub fn is_complete(&self) -> bool {
    !self.calling_code.is_empty()
  }
}
