//! The mirroring pipeline: resolve a sink, provision a surface, bind the
//! capture projection to it, and watch frame cadence while it runs.

pub mod binding;
pub mod encoder;
pub mod provision;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod telemetry;
pub mod types;

pub use binding::{VIRTUAL_DISPLAY_NAME, VirtualDisplayBinding, binding_flags};
pub use encoder::{DiscardSink, EncoderSettings, H264_MIME, target_bitrate};
pub use provision::{
    BufferedImageSurface, EncoderInputSurface, PresentationSurface, RenderSurface,
    SurfaceProvisioner, image_queue_settings,
};
pub use resolver::{Hotplug, HotplugEvents, Route, SinkResolver};
pub use session::MirroringSession;
pub use settings::{SessionTuning, SettingsAccess, StaticSettings};
pub use telemetry::{CadenceSummary, FrameCadence, FrameSample};
pub use types::{
    CaptureGrant, ConnectionMode, PixelFormat, RESULT_OK, SessionConfiguration, SurfaceKind,
    TargetDisplay,
};
