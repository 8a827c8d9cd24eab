//! Audio subsystem module

pub mod alert;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod sink;

pub use alert::ToneAlert;
pub use buffer::{AudioFrame, SampleRing};
pub use capture::MicCapture;
pub use device::{list_devices, AudioDevice, DeviceInfo};
pub use playback::SpeakerPlayback;
pub use sink::{AlertSignal, CaptureSource, LogAlert, NullPlayback, PlaybackSink, ToneCapture};
