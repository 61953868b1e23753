pub mod memory;
pub mod scripted;

pub use memory::{MemorySettingsRepository, MemorySignalLogStore, MemoryTradeHistory};
pub use scripted::{ScriptedLlm, ScriptedScanner, technical_scan};
