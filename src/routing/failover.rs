use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::DispatchError;
use crate::routing::{ProviderKind, RouteProvider};

/// Persistence seam for the active-provider choice, so a failover survives
/// process restarts.
#[async_trait]
pub trait ProviderStateStore: Send + Sync {
    async fn load_active(&self) -> Result<Option<ProviderKind>, DispatchError>;
    async fn save_active(&self, kind: ProviderKind) -> Result<(), DispatchError>;
}

/// Registry over the routing vendors. Tracks which provider is active and
/// degrades one step along the cyclic order when the active vendor reports
/// itself unavailable. There is no automatic switch-back.
pub struct ProviderFailover {
    active: AtomicU8,
    providers: Vec<Arc<dyn RouteProvider>>,
    state: Arc<dyn ProviderStateStore>,
}

impl ProviderFailover {
    pub async fn new(
        providers: Vec<Arc<dyn RouteProvider>>,
        state: Arc<dyn ProviderStateStore>,
        default: ProviderKind,
    ) -> Result<Self, DispatchError> {
        let active = state.load_active().await?.unwrap_or(default);
        let registry = Self {
            active: AtomicU8::new(active.index()),
            providers,
            state,
        };
        // Fail construction, not the first match, if the active vendor is not wired up.
        registry.provider(active)?;
        Ok(registry)
    }

    pub fn active(&self) -> ProviderKind {
        ProviderKind::from_index(self.active.load(Ordering::Acquire))
    }

    /// Resolves the explicit override, or the currently active provider.
    pub fn client(&self, name_override: Option<&str>) -> Result<Arc<dyn RouteProvider>, DispatchError> {
        let kind = match name_override {
            Some(name) => ProviderKind::parse(name)
                .ok_or_else(|| DispatchError::UnknownProvider(name.to_string()))?,
            None => self.active(),
        };
        self.provider(kind)
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn RouteProvider>, DispatchError> {
        self.providers
            .iter()
            .find(|provider| provider.kind() == kind)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownProvider(kind.as_str().to_string()))
    }

    /// Switches to the next provider if `failed` is still the active one, and
    /// persists the new choice. Concurrent reporters of the same failure
    /// produce exactly one switch; a stale reporter just learns the current
    /// active provider.
    pub async fn mark_unavailable(&self, failed: ProviderKind) -> Result<ProviderKind, DispatchError> {
        let next = failed.next();
        match self.active.compare_exchange(
            failed.index(),
            next.index(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.state.save_active(next).await?;
                info!(
                    from = failed.as_str(),
                    to = next.as_str(),
                    "routing provider marked unavailable; switched"
                );
                Ok(next)
            }
            Err(current) => Ok(ProviderKind::from_index(current)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{ProviderFailover, ProviderStateStore};
    use crate::error::DispatchError;
    use crate::models::rider::GeoPoint;
    use crate::routing::{ProviderKind, RouteError, RouteMetrics, RouteProvider, RouteStop};
    use crate::stores::memory::InMemoryProviderState;

    struct StaticProvider(ProviderKind);

    #[async_trait]
    impl RouteProvider for StaticProvider {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        async fn distances_and_durations(
            &self,
            _origin: &GeoPoint,
            _stops: &[RouteStop],
        ) -> Result<Vec<RouteMetrics>, RouteError> {
            Ok(Vec::new())
        }
    }

    fn providers() -> Vec<Arc<dyn RouteProvider>> {
        vec![
            Arc::new(StaticProvider(ProviderKind::TomTom)),
            Arc::new(StaticProvider(ProviderKind::Mapbox)),
        ]
    }

    async fn registry(state: Arc<InMemoryProviderState>) -> ProviderFailover {
        ProviderFailover::new(providers(), state, ProviderKind::TomTom)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn resolves_active_provider_by_default() {
        let registry = registry(Arc::new(InMemoryProviderState::default())).await;
        assert_eq!(registry.client(None).unwrap().kind(), ProviderKind::TomTom);
    }

    #[tokio::test]
    async fn explicit_override_beats_active_provider() {
        let registry = registry(Arc::new(InMemoryProviderState::default())).await;
        let client = registry.client(Some("mapbox")).unwrap();
        assert_eq!(client.kind(), ProviderKind::Mapbox);
        assert_eq!(registry.active(), ProviderKind::TomTom);
    }

    #[tokio::test]
    async fn unknown_override_is_rejected() {
        let registry = registry(Arc::new(InMemoryProviderState::default())).await;
        assert!(matches!(
            registry.client(Some("osrm")),
            Err(DispatchError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn failure_switches_exactly_once() {
        let state = Arc::new(InMemoryProviderState::default());
        let registry = registry(state.clone()).await;

        let after_first = registry.mark_unavailable(ProviderKind::TomTom).await.unwrap();
        assert_eq!(after_first, ProviderKind::Mapbox);

        // A second report of the same dead provider must not switch again.
        let after_second = registry.mark_unavailable(ProviderKind::TomTom).await.unwrap();
        assert_eq!(after_second, ProviderKind::Mapbox);
        assert_eq!(registry.active(), ProviderKind::Mapbox);
        assert_eq!(state.load_active().await.unwrap(), Some(ProviderKind::Mapbox));
    }

    #[tokio::test]
    async fn persisted_state_wins_over_default() {
        let state = Arc::new(InMemoryProviderState::default());
        state.save_active(ProviderKind::Mapbox).await.unwrap();

        let registry = ProviderFailover::new(providers(), state, ProviderKind::TomTom)
            .await
            .unwrap();
        assert_eq!(registry.active(), ProviderKind::Mapbox);
    }
}
