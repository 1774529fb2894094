//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use futures::stream::{self, BoxStream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::policy::{CachePolicy, CacheState, PolicyDecision, DEFAULT_VALIDITY_HOURS};
use super::storage::CountryStore;
use crate::country::types::Country;
use crate::error::FetchError;
use crate::resource::Resource;

/// Cache layer that manages caching logic and network fetching.
///
/// Each call produces its own result stream:
///
/// 1. `Loading`
/// 2. the cached value, if the policy serves cache first
/// 3. a network fetch and write-back, if the policy asks for one; on failure
///    either the cached value (fallback) or a terminal `Error`
/// 4. the current cache contents, re-emitted after every committed write
///
/// Consecutive identical values are emitted once. Storage work runs on the
/// blocking pool of the runtime passed to [`CacheLayer::new`].
pub struct CacheLayer<S: CountryStore> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  /// How long a cached row stays fresh
  validity: Duration,
  runtime: Handle,
}

impl<S: CountryStore + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S, runtime: Handle) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
      validity: Duration::hours(DEFAULT_VALIDITY_HOURS),
      runtime,
    }
  }

  /// Set how long cached rows stay fresh.
  pub fn with_validity(mut self, validity: Duration) -> Self {
    self.validity = validity;
    self
  }

  /// Replace the wall clock used for staleness checks.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn validity(&self) -> Duration {
    self.validity
  }

  pub fn now_millis(&self) -> i64 {
    self.clock.now_millis()
  }

  /// Run a storage operation on the blocking pool.
  pub async fn blocking<R, F>(&self, op: F) -> Result<R, FetchError>
  where
    R: Send + 'static,
    F: FnOnce(&S) -> color_eyre::Result<R> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    self
      .runtime
      .spawn_blocking(move || op(storage.as_ref()))
      .await
      .map_err(FetchError::storage)?
      .map_err(FetchError::storage)
  }

  /// Stream the whole country list under `policy`.
  ///
  /// `fetcher` is called at most once. The stream ends only after a terminal
  /// `Error`; otherwise it follows the cache until dropped.
  pub fn watch_all<F, Fut>(&self, policy: CachePolicy, fetcher: F) -> BoxStream<'static, Resource<Vec<Country>>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<Country>, FetchError>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let layer = self.clone();

    self.runtime.spawn(async move {
      let mut emitter = Emitter::new(tx);
      if layer.settle_all(policy, fetcher, &mut emitter).await {
        layer.follow_all(&mut emitter, true).await;
      }
    });

    receiver_stream(rx)
  }

  /// Stream a single country (alpha-3 or alpha-2 `code`) under `policy`.
  ///
  /// `fetcher` resolves to `None` when the remote does not know the code.
  pub fn watch_one<F, Fut>(&self, code: &str, policy: CachePolicy, fetcher: F) -> BoxStream<'static, Resource<Country>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<Country>, FetchError>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let layer = self.clone();
    let code = code.to_string();

    self.runtime.spawn(async move {
      let mut emitter = Emitter::new(tx);
      if let Some(key) = layer.settle_one(&code, policy, fetcher, &mut emitter).await {
        layer.follow_one(&key, &mut emitter, true).await;
      }
    });

    receiver_stream(rx)
  }

  /// Resolve the country list once: the value the stream from
  /// [`CacheLayer::watch_all`] settles on before it starts following the cache.
  pub async fn load_all<F, Fut>(&self, policy: CachePolicy, fetcher: F) -> Result<Vec<Country>, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Country>, FetchError>>,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut emitter = Emitter::new(tx);
    if self.settle_all(policy, fetcher, &mut emitter).await {
      self.follow_all(&mut emitter, false).await;
    }
    drop(emitter);

    last_outcome(rx, FetchError::EmptyCache)
  }

  /// Resolve a single country once.
  pub async fn load_one<F, Fut>(&self, code: &str, policy: CachePolicy, fetcher: F) -> Result<Country, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<Country>, FetchError>>,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut emitter = Emitter::new(tx);
    if let Some(key) = self.settle_one(code, policy, fetcher, &mut emitter).await {
      self.follow_one(&key, &mut emitter, false).await;
    }
    drop(emitter);

    last_outcome(rx, FetchError::NotFound(code.to_string()))
  }

  /// Steps 1-3 for the list. Returns whether the caller should go on to
  /// follow the cache.
  async fn settle_all<F, Fut>(&self, policy: CachePolicy, fetcher: F, emitter: &mut Emitter<Vec<Country>>) -> bool
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Country>, FetchError>>,
  {
    if !emitter.loading() {
      return false;
    }

    let cached = match self.blocking(|s| s.all_countries()).await {
      Ok(rows) => rows,
      Err(err) => {
        emitter.error(err);
        return false;
      }
    };

    let state = list_state(&cached);
    let decision = PolicyDecision::evaluate(policy, &state, self.now_millis(), self.validity);
    debug!(?policy, cached = cached.len(), ?decision, "Resolving country list");

    if policy == CachePolicy::CacheOnly && !state.has_rows {
      emitter.error(FetchError::EmptyCache);
      return false;
    }

    if decision.emit_cache_first && !emitter.success(cached.clone()) {
      return false;
    }

    if decision.fetch_network {
      if let Err(err) = self.refresh_all(fetcher).await {
        if decision.fallback_to_cache && state.has_rows && err.allows_fallback() {
          warn!(error = %err, "Country list fetch failed, serving cache");
          return emitter.success(cached);
        }
        warn!(error = %err, "Country list fetch failed");
        emitter.error(err);
        return false;
      }
    }

    true
  }

  /// Fetch the list and replace the cache with it.
  async fn refresh_all<F, Fut>(&self, fetcher: F) -> Result<(), FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Country>, FetchError>>,
  {
    info!("Fetching all countries");
    let fetched = fetcher().await?;
    let received = fetched.len();

    let now = self.now_millis();
    let countries: Vec<Country> = fetched
      .into_iter()
      .filter(|c| !c.alpha3.is_empty())
      .map(|mut c| {
        c.last_updated = now;
        c
      })
      .collect();

    if countries.len() < received {
      warn!(skipped = received - countries.len(), "Dropping countries without an alpha-3 code");
    }

    let count = countries.len();
    self.blocking(move |s| s.replace_all(&countries)).await?;
    info!(count, "Cached country list");

    Ok(())
  }

  /// Step 4 for the list. With `follow` unset, emits the current rows once.
  async fn follow_all(&self, emitter: &mut Emitter<Vec<Country>>, follow: bool) {
    let mut changes = self.storage.subscribe();

    loop {
      match self.blocking(|s| s.all_countries()).await {
        Ok(rows) => {
          if !emitter.success(rows) {
            return;
          }
        }
        Err(err) => {
          emitter.error(err);
          return;
        }
      }

      if !follow {
        return;
      }

      tokio::select! {
        changed = changes.changed() => {
          if changed.is_err() {
            return;
          }
        }
        _ = emitter.closed() => return,
      }
    }
  }

  /// Steps 1-3 for a single country. Returns the alpha-3 key to follow, or
  /// `None` once the stream is finished.
  async fn settle_one<F, Fut>(
    &self,
    code: &str,
    policy: CachePolicy,
    fetcher: F,
    emitter: &mut Emitter<Country>,
  ) -> Option<String>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<Country>, FetchError>>,
  {
    if !emitter.loading() {
      return None;
    }

    let lookup = code.to_string();
    let cached = match self.blocking(move |s| s.country(&lookup)).await {
      Ok(row) => row,
      Err(err) => {
        emitter.error(err);
        return None;
      }
    };

    // An incomplete row counts as not fresh so cache-first repairs it.
    let state = match &cached {
      Some(c) => CacheState {
        has_rows: true,
        oldest_update: Some(c.last_updated),
        complete: c.is_complete(),
      },
      None => CacheState::empty(),
    };
    let decision = PolicyDecision::evaluate(policy, &state, self.now_millis(), self.validity);
    debug!(code, ?policy, cached = cached.is_some(), ?decision, "Resolving country");

    if policy == CachePolicy::CacheOnly && cached.is_none() {
      emitter.error(FetchError::NotFound(code.to_string()));
      return None;
    }

    let mut key = cached
      .as_ref()
      .map_or_else(|| code.to_string(), |c| c.alpha3.clone());

    if decision.emit_cache_first {
      if let Some(c) = &cached {
        if !emitter.success(c.clone()) {
          return None;
        }
      }
    }

    if decision.fetch_network {
      match self.refresh_one(code, fetcher).await {
        Ok(alpha3) => key = alpha3,
        Err(err) => match cached {
          Some(c) if decision.fallback_to_cache && err.allows_fallback() => {
            warn!(code, error = %err, "Country fetch failed, serving cache");
            if !emitter.success(c) {
              return None;
            }
          }
          _ => {
            warn!(code, error = %err, "Country fetch failed");
            emitter.error(err);
            return None;
          }
        },
      }
    }

    Some(key)
  }

  /// Fetch one country and upsert it. Returns its alpha-3 code.
  async fn refresh_one<F, Fut>(&self, code: &str, fetcher: F) -> Result<String, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<Country>, FetchError>>,
  {
    info!(code, "Fetching country");
    let mut country = fetcher()
      .await?
      .filter(|c| !c.alpha3.is_empty())
      .ok_or_else(|| FetchError::NotFound(code.to_string()))?;

    country.last_updated = self.now_millis();
    let alpha3 = country.alpha3.clone();
    self.blocking(move |s| s.upsert(&country)).await?;
    debug!(code, alpha3 = %alpha3, "Cached country");

    Ok(alpha3)
  }

  /// Step 4 for a single country. A row that disappears (cache cleared) is
  /// skipped until it is written again.
  async fn follow_one(&self, alpha3: &str, emitter: &mut Emitter<Country>, follow: bool) {
    let mut changes = self.storage.subscribe();

    loop {
      let lookup = alpha3.to_string();
      match self.blocking(move |s| s.country(&lookup)).await {
        Ok(Some(row)) => {
          if !emitter.success(row) {
            return;
          }
        }
        Ok(None) => {}
        Err(err) => {
          emitter.error(err);
          return;
        }
      }

      if !follow {
        return;
      }

      tokio::select! {
        changed = changes.changed() => {
          if changed.is_err() {
            return;
          }
        }
        _ = emitter.closed() => return,
      }
    }
  }
}

impl<S: CountryStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      validity: self.validity,
      runtime: self.runtime.clone(),
    }
  }
}

/// Presence, age and completeness of a cached list.
fn list_state(rows: &[Country]) -> CacheState {
  CacheState {
    has_rows: !rows.is_empty(),
    oldest_update: rows.iter().map(|c| c.last_updated).min(),
    complete: rows.iter().all(Country::is_complete),
  }
}

/// Sending half of a result stream.
struct Emitter<T> {
  tx: mpsc::UnboundedSender<Resource<T>>,
  last: Option<T>,
}

impl<T: Clone + PartialEq> Emitter<T> {
  fn new(tx: mpsc::UnboundedSender<Resource<T>>) -> Self {
    Self { tx, last: None }
  }

  /// Returns false once the subscriber is gone.
  fn loading(&self) -> bool {
    self.tx.send(Resource::Loading).is_ok()
  }

  /// Emit `data` unless it equals the previous success. Returns false once
  /// the subscriber is gone.
  fn success(&mut self, data: T) -> bool {
    if self.last.as_ref() == Some(&data) {
      return !self.tx.is_closed();
    }
    self.last = Some(data.clone());
    self.tx.send(Resource::Success(data)).is_ok()
  }

  fn error(&self, err: FetchError) {
    let _ = self.tx.send(Resource::Error(err));
  }

  async fn closed(&self) {
    self.tx.closed().await
  }
}

fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
  stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// Last success or error left in a finished stream.
fn last_outcome<T>(mut rx: mpsc::UnboundedReceiver<Resource<T>>, missing: FetchError) -> Result<T, FetchError> {
  let mut outcome = Err(missing);
  while let Ok(item) = rx.try_recv() {
    match item {
      Resource::Loading => {}
      Resource::Success(data) => outcome = Ok(data),
      Resource::Error(err) => outcome = Err(err),
    }
  }
  outcome
}
