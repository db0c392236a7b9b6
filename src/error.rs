// Typed failure surface for cartridge loading. Faults that occur once the engine is
// already running (bad bank index, prohibited-range access) are recovered locally
// instead of propagated — see the bus and mapper implementations.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("rom is too short to contain a header: got {len} bytes, need at least 0x150")]
    Truncated { len: usize },

    #[error("unsupported cartridge type byte {0:#04x}")]
    UnsupportedCartridgeType(u8),

    #[error("unsupported rom size byte {0:#04x}")]
    UnsupportedRomSize(u8),

    #[error("unsupported ram size byte {0:#04x}")]
    UnsupportedRamSize(u8),

    #[error("rom declares {declared} bytes but file is only {actual} bytes")]
    RomSizeMismatch { declared: usize, actual: usize },
}
