//! MPEG Transport Stream handling: packet/PSI parsing and serialization,
//! PES reassembly and re-packetization, T2-MI de-encapsulation, and the
//! bitrate-paced sync buffer.

pub mod parser;
pub mod pes;
pub mod sync_buffer;
pub mod t2mi;
pub mod types;

pub use parser::TSPacketParser;
pub use pes::{PesEngine, PesMode, PesStats};
pub use sync_buffer::{SyncBuffer, SyncState};
pub use t2mi::{PlpSelection, T2miDecap};
