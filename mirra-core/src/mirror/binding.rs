//! Virtual display binding: the live link from the capture projection to
//! a render surface.

use tracing::{info, warn};

use crate::error::MirrorError;
use crate::flags::VirtualDisplayFlags;
use crate::mirror::provision::{RenderSurface, SurfaceLease, guarded};
use crate::mirror::resolver::Route;
use crate::mirror::types::SessionConfiguration;
use crate::platform::{PlatformError, ScreenCapture, VirtualDisplay, VirtualDisplayRequest};

/// Name the virtual display is registered under.
pub const VIRTUAL_DISPLAY_NAME: &str = "mirra-mirror";

/// Flags for binding `route`: auto-mirror and presentation always, own
/// content only for wireless, trusted when low latency asks for it and the
/// platform allows it.
pub fn binding_flags(
    route: &Route,
    config: &SessionConfiguration,
    trusted_supported: bool,
) -> VirtualDisplayFlags {
    let mut flags = VirtualDisplayFlags::AUTO_MIRROR | VirtualDisplayFlags::PRESENTATION;
    match route {
        Route::Direct { .. } => {}
        Route::Wireless { .. } => flags |= VirtualDisplayFlags::OWN_CONTENT_ONLY,
    }
    if config.low_latency && trusted_supported {
        flags |= VirtualDisplayFlags::TRUSTED;
    }
    flags
}

/// A live virtual display. Holds the target surface's lease until released.
pub struct VirtualDisplayBinding {
    display: Box<dyn VirtualDisplay>,
    lease: SurfaceLease,
    flags: VirtualDisplayFlags,
    released: bool,
}

impl VirtualDisplayBinding {
    /// Route the capture into `surface`.
    ///
    /// A permission rejection of the trusted flag is retried once without
    /// it; any other rejection is a [`MirrorError::Binding`].
    pub(crate) fn bind(
        capture: &dyn ScreenCapture,
        route: &Route,
        surface: &RenderSurface,
        config: &SessionConfiguration,
    ) -> Result<Self, MirrorError> {
        if surface.is_released() {
            return Err(MirrorError::Provisioning("surface already released".into()));
        }
        let target = route.target();
        let mut request = VirtualDisplayRequest {
            name: VIRTUAL_DISPLAY_NAME.to_string(),
            width: target.width,
            height: target.height,
            density_dpi: target.density_dpi,
            surface: surface.handle(),
            flags: binding_flags(route, config, capture.supports_trusted_displays()),
        };

        let display = match capture.create_virtual_display(&request) {
            Ok(display) => display,
            Err(PlatformError::PermissionDenied(reason))
                if request.flags.contains(VirtualDisplayFlags::TRUSTED) =>
            {
                warn!("trusted virtual display rejected ({reason}), retrying untrusted");
                request.flags = request.flags.untrusted();
                capture
                    .create_virtual_display(&request)
                    .map_err(MirrorError::Binding)?
            }
            Err(e) => return Err(MirrorError::Binding(e)),
        };

        let lease = surface.lease().clone();
        lease.acquire();
        info!(
            width = request.width,
            height = request.height,
            flags = ?request.flags,
            surface = %surface.kind(),
            "virtual display bound"
        );
        Ok(Self {
            display,
            lease,
            flags: request.flags,
            released: false,
        })
    }

    /// Flags the platform accepted.
    pub fn flags(&self) -> VirtualDisplayFlags {
        self.flags
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the virtual display and its surface lease. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        guarded("virtual display", self.display.release());
        self.lease.release();
        self.released = true;
    }
}

impl Drop for VirtualDisplayBinding {
    fn drop(&mut self) {
        self.release();
    }
}
