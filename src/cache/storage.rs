//! Country store trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::country::types::{Country, Currency, Language};

/// Trait for local country caches.
///
/// Every successful write bumps the version published through `subscribe`,
/// after the write is committed.
pub trait CountryStore: Send + Sync {
  /// All cached countries, ordered by name.
  fn all_countries(&self) -> Result<Vec<Country>>;

  /// A single country by alpha-3 or alpha-2 code.
  fn country(&self, code: &str) -> Result<Option<Country>>;

  /// Replace the whole table with `countries`.
  fn replace_all(&self, countries: &[Country]) -> Result<()>;

  /// Insert or overwrite one country by alpha-3 code.
  fn upsert(&self, country: &Country) -> Result<()>;

  /// Delete every cached country. Favorites are kept.
  fn clear(&self) -> Result<()>;

  /// Number of rows written at or before `threshold` (epoch millis).
  fn stale_count(&self, threshold: i64) -> Result<usize>;

  /// Countries whose name, capital or code matches `query`, ordered by name.
  fn search(&self, query: &str) -> Result<Vec<Country>>;

  /// Mark or unmark a country as favorite.
  fn set_favorite(&self, alpha3: &str, favorite: bool, at: i64) -> Result<()>;

  fn is_favorite(&self, alpha3: &str) -> Result<bool>;

  /// Cached countries that are favorites, ordered by name.
  fn favorites(&self) -> Result<Vec<Country>>;

  /// Change notifications; the value is a write counter.
  fn subscribe(&self) -> watch::Receiver<u64>;
}

/// SQLite-based country store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  changes: watch::Sender<u64>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS countries (
    alpha3 TEXT PRIMARY KEY NOT NULL CHECK (alpha3 <> ''),
    alpha2 TEXT NOT NULL,
    name TEXT NOT NULL,
    capital TEXT NOT NULL,
    population INTEGER NOT NULL,
    region TEXT NOT NULL,
    languages TEXT NOT NULL,
    currencies TEXT NOT NULL,
    calling_code TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    last_updated INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_countries_alpha2 ON countries(alpha2);
CREATE INDEX IF NOT EXISTS idx_countries_updated ON countries(last_updated);

CREATE TABLE IF NOT EXISTS favorites (
    alpha3 TEXT PRIMARY KEY NOT NULL,
    added_at INTEGER NOT NULL
);
"#;

const COUNTRY_COLUMNS: &str = "c.alpha3, c.alpha2, c.name, c.capital, c.population, c.region, \
   c.languages, c.currencies, c.calling_code, c.latitude, c.longitude, c.last_updated";

impl SqliteStorage {
  /// Open or create the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory cache.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    let (changes, _) = watch::channel(0);
    Ok(Self {
      conn: Mutex::new(conn),
      changes,
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn notify(&self) {
    self.changes.send_modify(|version| *version += 1);
  }

  fn query_countries(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Country>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let countries = stmt
      .query_map(params, row_to_country)
      .map_err(|e| eyre!("Failed to query countries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read country row: {}", e))?;

    Ok(countries)
  }
}

impl CountryStore for SqliteStorage {
  fn all_countries(&self) -> Result<Vec<Country>> {
    self.query_countries(
      &format!(
        "SELECT {} FROM countries c ORDER BY c.name, c.alpha3",
        COUNTRY_COLUMNS
      ),
      [],
    )
  }

  fn country(&self, code: &str) -> Result<Option<Country>> {
    let conn = self.lock()?;
    let sql = format!(
      "SELECT {} FROM countries c WHERE c.alpha3 = ?1 OR c.alpha2 = ?1
       ORDER BY c.alpha3 = ?1 DESC LIMIT 1",
      COUNTRY_COLUMNS
    );

    conn
      .query_row(&sql, params![code], row_to_country)
      .optional()
      .map_err(|e| eyre!("Failed to read country {}: {}", code, e))
  }

  fn replace_all(&self, countries: &[Country]) -> Result<()> {
    {
      let mut conn = self.lock()?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      tx.execute("DELETE FROM countries", [])
        .map_err(|e| eyre!("Failed to clear countries: {}", e))?;

      for country in countries {
        insert_country(&tx, country)?;
      }

      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    }

    self.notify();
    Ok(())
  }

  fn upsert(&self, country: &Country) -> Result<()> {
    {
      let conn = self.lock()?;
      insert_country(&conn, country)?;
    }

    self.notify();
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    {
      let conn = self.lock()?;
      conn
        .execute("DELETE FROM countries", [])
        .map_err(|e| eyre!("Failed to clear countries: {}", e))?;
    }

    self.notify();
    Ok(())
  }

  fn stale_count(&self, threshold: i64) -> Result<usize> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT COUNT(*) FROM countries WHERE last_updated <= ?",
        params![threshold],
        |row| row.get::<_, i64>(0),
      )
      .map(|n| n as usize)
      .map_err(|e| eyre!("Failed to count stale countries: {}", e))
  }

  fn search(&self, query: &str) -> Result<Vec<Country>> {
    let query = query.trim();
    let pattern = format!("%{}%", escape_like(query));
    self.query_countries(
      &format!(
        "SELECT {} FROM countries c
         WHERE c.name LIKE ?1 ESCAPE '\\' OR c.capital LIKE ?1 ESCAPE '\\'
            OR c.alpha3 = upper(?2) OR c.alpha2 = upper(?2)
         ORDER BY c.name, c.alpha3",
        COUNTRY_COLUMNS
      ),
      params![pattern, query],
    )
  }

  fn set_favorite(&self, alpha3: &str, favorite: bool, at: i64) -> Result<()> {
    {
      let conn = self.lock()?;
      if favorite {
        conn
          .execute(
            "INSERT OR IGNORE INTO favorites (alpha3, added_at) VALUES (?, ?)",
            params![alpha3, at],
          )
          .map_err(|e| eyre!("Failed to add favorite {}: {}", alpha3, e))?;
      } else {
        conn
          .execute("DELETE FROM favorites WHERE alpha3 = ?", params![alpha3])
          .map_err(|e| eyre!("Failed to remove favorite {}: {}", alpha3, e))?;
      }
    }

    self.notify();
    Ok(())
  }

  fn is_favorite(&self, alpha3: &str) -> Result<bool> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM favorites WHERE alpha3 = ?)",
        params![alpha3],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read favorite {}: {}", alpha3, e))
  }

  fn favorites(&self) -> Result<Vec<Country>> {
    self.query_countries(
      &format!(
        "SELECT {} FROM countries c
         INNER JOIN favorites f ON f.alpha3 = c.alpha3
         ORDER BY c.name, c.alpha3",
        COUNTRY_COLUMNS
      ),
      [],
    )
  }

  fn subscribe(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }
}

fn insert_country(conn: &Connection, country: &Country) -> Result<()> {
  let languages = serde_json::to_string(&country.languages)
    .map_err(|e| eyre!("Failed to serialize languages: {}", e))?;
  let currencies = serde_json::to_string(&country.currencies)
    .map_err(|e| eyre!("Failed to serialize currencies: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO countries (alpha3, alpha2, name, capital, population, region,
         languages, currencies, calling_code, latitude, longitude, last_updated)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        country.alpha3,
        country.alpha2,
        country.name,
        country.capital,
        country.population,
        country.region,
        languages,
        currencies,
        country.calling_code,
        country.latitude,
        country.longitude,
        country.last_updated,
      ],
    )
    .map_err(|e| eyre!("Failed to store country {}: {}", country.alpha3, e))?;

  Ok(())
}

fn row_to_country(row: &Row<'_>) -> rusqlite::Result<Country> {
  let languages: String = row.get(6)?;
  let currencies: String = row.get(7)?;

  Ok(Country {
    alpha3: row.get(0)?,
    alpha2: row.get(1)?,
    name: row.get(2)?,
    capital: row.get(3)?,
    population: row.get(4)?,
    region: row.get(5)?,
    languages: parse_json_column::<Vec<Language>>(6, &languages)?,
    currencies: parse_json_column::<Vec<Currency>>(7, &currencies)?,
    calling_code: row.get(8)?,
    latitude: row.get(9)?,
    longitude: row.get(10)?,
    last_updated: row.get(11)?,
  })
}

fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
  serde_json::from_str(text)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    if matches!(ch, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(ch);
  }
  out
}
