use clap::Subcommand;
use color_eyre::{Report, Result};
use futures::{Stream, StreamExt};
use std::fmt::Write as _;

use crate::cache::{CachePolicy, CountryStore};
use crate::country::client::CountrySource;
use crate::country::repository::{CacheStatus, CountryRepository};
use crate::country::types::Country;
use crate::error::FetchError;
use crate::resource::Resource;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// List all countries
  List {
    /// Cache policy (default from config, usually cache-first)
    #[arg(short, long, value_enum)]
    policy: Option<CachePolicy>,
    /// Keep printing updates until interrupted
    #[arg(short, long)]
    watch: bool,
  },
  /// Show one country by alpha-3 or alpha-2 code
  Show {
    code: String,
    #[arg(short, long, value_enum)]
    policy: Option<CachePolicy>,
    #[arg(short, long)]
    watch: bool,
  },
  /// Search cached countries by name, capital or code
  Search { query: String },
  /// Manage favorite countries
  #[command(subcommand)]
  Favorite(FavoriteCommand),
  /// Show what the local cache holds
  Status,
  /// Delete all cached countries (favorites are kept)
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum FavoriteCommand {
  /// Mark a cached country as favorite
  Add { code: String },
  /// Unmark a favorite
  Remove { code: String },
  /// List favorites
  List,
}

/// Run `command` against `repo`, printing results to stdout.
pub async fn run<R, S>(command: Command, repo: &CountryRepository<R, S>, default_policy: CachePolicy) -> Result<()>
where
  R: CountrySource + 'static,
  S: CountryStore + 'static,
{
  match command {
    Command::List { policy, watch } => {
      let policy = policy.unwrap_or(default_policy);
      if watch {
        follow(repo.countries(policy), |rows: &Vec<Country>| format_table(rows)).await
      } else {
        let rows = repo.load_countries(policy).await.map_err(report)?;
        print!("{}", format_table(&rows));
        Ok(())
      }
    }
    Command::Show { code, policy, watch } => {
      let policy = policy.unwrap_or(default_policy);
      if watch {
        follow(repo.country(&code, policy), format_detail).await
      } else {
        let country = repo.load_country(&code, policy).await.map_err(report)?;
        print!("{}", format_detail(&country));
        Ok(())
      }
    }
    Command::Search { query } => {
      let rows = repo.search(&query).await.map_err(report)?;
      if rows.is_empty() {
        println!("No cached country matches '{}'.", query);
      } else {
        print!("{}", format_table(&rows));
      }
      Ok(())
    }
    Command::Favorite(FavoriteCommand::Add { code }) => {
      let country = repo.set_favorite(&code, true).await.map_err(report)?;
      println!("★ {} ({})", country.name, country.alpha3);
      Ok(())
    }
    Command::Favorite(FavoriteCommand::Remove { code }) => {
      let country = repo.set_favorite(&code, false).await.map_err(report)?;
      println!("☆ {} ({})", country.name, country.alpha3);
      Ok(())
    }
    Command::Favorite(FavoriteCommand::List) => {
      let rows = repo.favorites().await.map_err(report)?;
      if rows.is_empty() {
        println!("No favorites yet.");
      } else {
        print!("{}", format_table(&rows));
      }
      Ok(())
    }
    Command::Status => {
      let status = repo.status().await.map_err(report)?;
      print!("{}", format_status(&status));
      Ok(())
    }
    Command::Clear => {
      repo.clear().await.map_err(report)?;
      println!("Cache cleared.");
      Ok(())
    }
  }
}

/// Print every emission until the stream ends or Ctrl-C.
async fn follow<T>(mut stream: impl Stream<Item = Resource<T>> + Unpin, render: impl Fn(&T) -> String) -> Result<()> {
  loop {
    let item = tokio::select! {
      item = stream.next() => item,
      _ = tokio::signal::ctrl_c() => return Ok(()),
    };

    match item {
      Some(Resource::Loading) => eprintln!("Loading…"),
      Some(Resource::Success(data)) => {
        print!("{}", render(&data));
        println!();
      }
      Some(Resource::Error(err)) => return Err(report(err)),
      None => return Ok(()),
    }
  }
}

/// Keep the cause for logs and `--verbose`, lead with the user-facing hint.
fn report(err: FetchError) -> Report {
  tracing::error!(error = %err, "Command failed");
  let hint = err.user_message();
  Report::new(err).wrap_err(hint)
}

pub fn format_table(rows: &[Country]) -> String {
  let name_width = rows
    .iter()
    .map(|c| c.name.chars().count())
    .max()
    .unwrap_or(0)
    .clamp(4, 40);

  let mut out = String::new();
  for c in rows {
    let _ = writeln!(
      out,
      "{:<3}  {:<2}  {:<name_width$}  {:<6}  {}",
      c.alpha3,
      c.alpha2,
      truncate(&c.name, name_width),
      c.calling_code,
      c.capital,
    );
  }
  out
}

pub fn format_detail(c: &Country) -> String {
  let languages = c
    .languages
    .iter()
    .map(|l| {
      if l.native_name.is_empty() || l.native_name == l.name {
        l.name.clone()
      } else {
        format!("{} ({})", l.name, l.native_name)
      }
    })
    .collect::<Vec<_>>()
    .join(", ");

  let currencies = c
    .currencies
    .iter()
    .map(|cur| match (cur.name.is_empty(), cur.symbol.is_empty()) {
      (false, false) => format!("{} {} ({})", cur.code, cur.name, cur.symbol),
      (false, true) => format!("{} {}", cur.code, cur.name),
      _ => cur.code.clone(),
    })
    .collect::<Vec<_>>()
    .join(", ");

  let mut out = String::new();
  let _ = writeln!(out, "{} ({} / {})", c.name, c.alpha3, c.alpha2);
  let _ = writeln!(out, "  Capital:      {}", or_dash(&c.capital));
  let _ = writeln!(out, "  Region:       {}", or_dash(&c.region));
  let _ = writeln!(out, "  Population:   {}", group_thousands(c.population));
  let _ = writeln!(out, "  Calling code: {}", or_dash(&c.calling_code));
  let _ = writeln!(out, "  Languages:    {}", or_dash(&languages));
  let _ = writeln!(out, "  Currencies:   {}", or_dash(&currencies));
  let _ = writeln!(out, "  Coordinates:  {:.2}, {:.2}", c.latitude, c.longitude);
  let _ = writeln!(out, "  Cached:       {}", format_millis(c.last_updated));
  out
}

pub fn format_status(status: &CacheStatus) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "Countries: {}", status.countries);
  let _ = writeln!(out, "Stale:     {}", status.stale);
  let _ = writeln!(
    out,
    "Oldest:    {}",
    status.oldest_update.map(format_millis).unwrap_or_else(|| "-".to_string())
  );
  let _ = writeln!(out, "Favorites: {}", status.favorites);
  out
}

fn format_millis(millis: i64) -> String {
  chrono::DateTime::from_timestamp_millis(millis)
    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| "unknown".to_string())
}

fn or_dash(s: &str) -> &str {
  if s.is_empty() {
    "-"
  } else {
    s
  }
}

fn truncate(s: &str, width: usize) -> String {
  if s.chars().count() <= width {
    s.to_string()
  } else {
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
  }
}

fn group_thousands(n: i64) -> String {
  let digits = n.unsigned_abs().to_string();
  let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
  for (i, ch) in digits.chars().enumerate() {
    if i > 0 && (digits.len() - i) % 3 == 0 {
      out.push(',');
    }
    out.push(ch);
  }
  if n < 0 {
    out.insert(0, '-');
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::country::types::{Currency, Language};

  fn france() -> Country {
    Country {
      alpha3: "FRA".to_string(),
      alpha2: "FR".to_string(),
      name: "France".to_string(),
      capital: "Paris".to_string(),
      population: 67391582,
      region: "Western Europe".to_string(),
      languages: vec![Language {
        name: "French".to_string(),
        native_name: "français".to_string(),
      }],
      currencies: vec![Currency {
        code: "EUR".to_string(),
        name: "Euro".to_string(),
        symbol: "€".to_string(),
      }],
      calling_code: "+33".to_string(),
      latitude: 46.0,
      longitude: 2.0,
      last_updated: 0,
    }
  }

  #[test]
  fn test_group_thousands() {
    assert_eq!(group_thousands(0), "0");
    assert_eq!(group_thousands(999), "999");
    assert_eq!(group_thousands(1000), "1,000");
    assert_eq!(group_thousands(67391582), "67,391,582");
    assert_eq!(group_thousands(-1234), "-1,234");
  }

  #[test]
  fn test_truncate_long_names() {
    assert_eq!(truncate("France", 10), "France");
    assert_eq!(truncate("Saint Helena", 6), "Saint…");
  }

  #[test]
  fn test_detail_lists_languages_and_currencies() {
    let detail = format_detail(&france());
    assert!(detail.starts_with("France (FRA / FR)"));
    assert!(detail.contains("French (français)"));
    assert!(detail.contains("EUR Euro (€)"));
    assert!(detail.contains("67,391,582"));
    assert!(detail.contains("1970-01-01 00:00:00 UTC"));
  }

  #[test]
  fn test_detail_dashes_empty_fields() {
    let bare = Country {
      alpha3: "ATA".to_string(),
      name: "Antarctica".to_string(),
      ..Default::default()
    };
    let detail = format_detail(&bare);
    assert!(detail.contains("Capital:      -"));
    assert!(detail.contains("Languages:    -"));
  }

  #[test]
  fn test_table_one_line_per_country() {
    let table = format_table(&[france(), france()]);
    assert_eq!(table.lines().count(), 2);
    assert!(table.lines().next().unwrap().starts_with("FRA  FR  France"));
  }
}
