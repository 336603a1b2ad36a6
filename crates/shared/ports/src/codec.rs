use hermes_core::{Frame, SubscriptionSpec};

use crate::CodecError;

/// Translation between one exchange's wire format and canonical frames
///
/// Implementations own every vendor difference (field names, pair
/// formatting, envelope shape). `request_id` is echoed back by the exchange
/// and surfaces as `Frame::Ack`.
pub trait FrameCodec: Send + Sync {
    fn encode_subscribe(
        &self,
        request_id: u64,
        specs: &[SubscriptionSpec],
    ) -> Result<String, CodecError>;

    fn encode_unsubscribe(
        &self,
        request_id: u64,
        specs: &[SubscriptionSpec],
    ) -> Result<String, CodecError>;

    /// One raw message may carry several frames
    fn decode(&self, raw: &str) -> Result<Vec<Frame>, CodecError>;
}
