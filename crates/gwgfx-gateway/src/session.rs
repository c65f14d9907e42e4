//! One bridged RDP session: the GFX client, its H.264 frame queue consumer,
//! and the compositor that routes decoded output onward.

use gwgfx_compositor::Compositor;
use gwgfx_egfx::client::{GraphicsPipelineClient, GraphicsPipelineHandler};
use gwgfx_egfx::decode::H264Decoder;
use gwgfx_session::SessionId;

/// Default handler: the gateway reads decoded state back out of
/// `GraphicsPipelineClient::surface_bank` directly rather than mirroring it
/// through callbacks, so every hook here is a no-op save for logging.
/// Grounded on `ironrdp-egfx`'s own default trait-method bodies, which are
/// all no-ops for the same reason (callers opt into only the hooks they
/// need).
struct BridgeHandler {
    session_id: SessionId,
}

impl GraphicsPipelineHandler for BridgeHandler {
    fn on_close(&mut self) {
        tracing::debug!(session_id = ?self.session_id, "GFX channel closed");
    }
}

/// A single session's bridged pipeline state (§5: "RDP client worker
/// threads" own this; the gateway's drain loop only reads queues out of it).
pub struct GatewaySession {
    pub id: SessionId,
    pub client: GraphicsPipelineClient,
    pub compositor: Compositor,
}

impl GatewaySession {
    #[must_use]
    pub fn new(id: SessionId, h264_decoder: Option<Box<dyn H264Decoder>>) -> Self {
        let handler = Box::new(BridgeHandler { session_id: id });
        Self {
            id,
            client: GraphicsPipelineClient::new(handler, h264_decoder),
            compositor: Compositor::new(),
        }
    }

    /// Pops one queued H.264 frame, if any, pairing it with the region the
    /// compositor recorded for the most recently submitted job (§4.9's
    /// pop-on-callback pattern, applied at the gateway layer since this is
    /// where the two independently-maintained queues — `h264_queue` inside
    /// the GFX client, and the compositor's active-region list — meet).
    pub fn pop_h264_frame(&mut self) -> Option<(gwgfx_h264::Frame, Option<(u16, gwgfx_compositor::Rect)>)> {
        let frame = self.client.pop_h264_frame()?;
        let region = self.compositor.pop_h264_region();
        Some((frame, region))
    }
}
