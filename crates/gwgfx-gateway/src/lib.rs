//! Bridges the session registry, GFX/progressive decode, H.264 queue, and
//! compositor behind one polling drain call (§5).
//!
//! Grounded on `ironrdp-server`'s acceptor-plus-run-loop shape: a registry
//! of live connections polled from one place, with CPU-bound codec work
//! split off onto a `rayon` pool.

pub mod config;
pub mod progressive_pool;
pub mod session;

use std::collections::HashMap;

pub use config::Config;
use gwgfx_egfx::decode::H264Decoder;
pub use gwgfx_h264::Frame as H264Frame;
use gwgfx_session::{SessionError, SessionId, SessionRegistry};
pub use progressive_pool::{ProgressiveJobResult, ProgressivePool};
use session::GatewaySession;

/// One iteration's worth of work a drain call surfaced, handed back to the
/// caller (e.g. the websocket layer) for dispatch to the browser.
#[derive(Default)]
pub struct DrainResult {
    pub h264_frames: Vec<(SessionId, H264Frame)>,
    pub finished_progressive_jobs: Vec<ProgressiveJobResult>,
}

/// Top-level gateway state. Owns the session registry and every session's
/// bridged pipeline; `drain_once` is the "single polling drain call" named
/// in §5's concurrency model.
pub struct Gateway {
    config: Config,
    registry: SessionRegistry,
    sessions: HashMap<SessionId, GatewaySession>,
    progressive_pool: ProgressivePool,
}

impl Gateway {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_sessions),
            sessions: HashMap::new(),
            progressive_pool: ProgressivePool::new(0),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> Config {
        self.config
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connect(
        &mut self,
        width: u32,
        height: u32,
        h264_decoder: Option<Box<dyn H264Decoder>>,
    ) -> Result<SessionId, SessionError> {
        let id = self.registry.create_session(width, height)?;
        self.sessions.insert(id, GatewaySession::new(id, h264_decoder));
        Ok(id)
    }

    /// Tears down a session: per §5 Cancellation, workers are drained
    /// before the surface bank (owned by the session's `GraphicsPipelineClient`)
    /// is freed, which dropping `GatewaySession` accomplishes directly since
    /// nothing else retains a reference to it.
    pub fn disconnect(&mut self, id: SessionId) -> Result<(), SessionError> {
        self.registry.disconnect(id)?;
        self.sessions.remove(&id);
        self.registry.remove(id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut GatewaySession> {
        self.sessions.get_mut(&id)
    }

    /// Drains every session once: pops any ready H.264 frames and collects
    /// finished progressive-tile jobs from the worker pool. Callers run
    /// this from whatever scheduling context they use (a tokio task, a
    /// dedicated thread) — the gateway itself is executor-agnostic.
    pub fn drain_once(&mut self) -> DrainResult {
        let mut result = DrainResult::default();

        for (id, session) in &mut self.sessions {
            while let Some((frame, _region)) = session.pop_h264_frame() {
                result.h264_frames.push((*id, frame));
            }
        }

        result.finished_progressive_jobs = self.progressive_pool.drain_finished();
        result
    }

    /// Submits a progressive-codec payload for background decode (§5:
    /// bounded worker pool for progressive tiles).
    pub fn submit_progressive_job(
        &self,
        session_id: SessionId,
        surface_id: u16,
        decoder: gwgfx_graphics::progressive::ProgressiveDecoder,
        payload: Vec<u8>,
    ) {
        self.progressive_pool.submit(session_id, surface_id, decoder, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_disconnect_round_trips_through_registry() {
        let mut gateway = Gateway::new(Config { max_sessions: gwgfx_session::MIN_MAX_SESSIONS });
        let id = gateway.connect(800, 600, None).unwrap();
        assert_eq!(gateway.registry().len(), 1);
        assert!(gateway.session_mut(id).is_some());

        gateway.disconnect(id).unwrap();
        assert_eq!(gateway.registry().len(), 0);
        assert!(gateway.session_mut(id).is_none());
    }

    #[test]
    fn connect_rejects_past_capacity() {
        let mut gateway = Gateway::new(Config { max_sessions: gwgfx_session::MIN_MAX_SESSIONS });
        gateway.connect(800, 600, None).unwrap();
        gateway.connect(800, 600, None).unwrap();
        let err = gateway.connect(800, 600, None).unwrap_err();
        assert!(matches!(err, SessionError::RegistryFull { .. }));
    }

    #[test]
    fn drain_once_collects_finished_progressive_jobs() {
        let mut gateway = Gateway::new(Config::default());
        let id = gateway.connect(800, 600, None).unwrap();
        gateway.submit_progressive_job(id, 1, gwgfx_graphics::progressive::ProgressiveDecoder::new(), Vec::new());

        std::thread::sleep(std::time::Duration::from_millis(50));
        let drained = gateway.drain_once();
        assert_eq!(drained.finished_progressive_jobs.len(), 1);
    }
}
