use impnet_packets::MacAddr;
use std::error::Error;
use std::fmt;

/// Returned by a transport that could not put a frame on the wire right now. The bridge treats
/// this as transient: DHCP backs off and retries, data paths count the loss and move on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitError;

impl fmt::Display for TransmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "transport refused the frame")
    }
}

impl Error for TransmitError {}

/// The wire side of a bridge.
///
/// `set_filter` communicates the unicast address we answer to plus any extra addresses worth
/// receiving (the bridge always wants broadcast regardless). Transports backed by hardware can
/// program their receive filter from it; software transports may ignore it.
pub trait Transport {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransmitError>;
    fn set_filter(&mut self, own_mac: MacAddr, extra: &[MacAddr]);
}
