pub mod audio;
pub mod bandwidth;
pub mod dsp;
pub mod engine;
pub mod layers;
pub mod network;
pub mod splitter;
