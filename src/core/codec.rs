use crate::core::Envelope;

/// Why an inbound frame could not be turned back into an [`Envelope`].
#[derive(Debug)]
pub struct DecodeError(pub serde_json::Error);

/// Encodes an envelope into a self-describing byte frame. Returns `None` only if serialization
/// itself fails, which the send path treats like any other transport-transient error.
pub fn encode(env: &Envelope) -> Option<Vec<u8>> {
  serde_json::to_vec(env).ok()
}

/// Decodes one frame. The receive loop logs and discards the error; a malformed frame never
/// terminates the loop.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
  serde_json::from_slice::<Envelope>(bytes).map_err(DecodeError)
}
