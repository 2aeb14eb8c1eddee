/// Bridge-wide settings, fixed at registry install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Validate hook handles against the live binding table (and their owning engine) before
    /// forwarding a removal to the native engine.
    ///
    /// When disabled, a handle the bridge does not know is forwarded unchanged and the native
    /// engine decides what removing it means.
    pub strict_hook_removal: bool,
    /// Emit a `trace!` event for every upcall.
    pub trace_upcalls: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            strict_hook_removal: true,
            trace_upcalls: false,
        }
    }
}
