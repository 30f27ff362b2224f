//! Interactive protocol between composition logic and front ends

mod channel;
mod envelope;
mod packet;

pub use channel::{channel, Interaction, PacketStream, RunId};
pub use envelope::{Envelope, Inbound, Outbound};
pub use packet::{Answer, Packet, Prompt, ResponseSlot};
