//! Backend call accounting for the downstream handler.

use std::time::Duration;

use serde::Serialize;

/// A backend whose calls are counted while the downstream handler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Relational storage.
    Sql,
    /// Key/value cache.
    Redis,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Sql, Backend::Redis];

    /// Name used in `X-<Name>-Calls` / `X-<Name>-Time` headers.
    #[inline]
    pub const fn header_name(self) -> &'static str {
        match self {
            Backend::Sql => "Sql",
            Backend::Redis => "Redis",
        }
    }
}

/// Call count and accumulated duration for one backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BackendTiming {
    pub calls: u32,
    pub duration_seconds: f64,
}

/// Per-request backend timings, filled in by the downstream through
/// [`Context::record_backend_call`](super::Context::record_backend_call).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BackendTimings {
    pub sql: BackendTiming,
    pub redis: BackendTiming,
}

impl BackendTimings {
    /// Count one call that took `elapsed`.
    #[inline]
    pub fn record(&mut self, backend: Backend, elapsed: Duration) {
        let slot = self.slot_mut(backend);
        slot.calls = slot.calls.saturating_add(1);
        slot.duration_seconds += elapsed.as_secs_f64();
    }

    #[inline]
    pub fn get(&self, backend: Backend) -> BackendTiming {
        match backend {
            Backend::Sql => self.sql,
            Backend::Redis => self.redis,
        }
    }

    /// True when no backend call was recorded.
    pub fn is_empty(&self) -> bool {
        self.sql.calls == 0 && self.redis.calls == 0
    }

    fn slot_mut(&mut self, backend: Backend) -> &mut BackendTiming {
        match backend {
            Backend::Sql => &mut self.sql,
            Backend::Redis => &mut self.redis,
        }
    }
}
