//! `HideProc`: the compositor that wires everything to one host.
//!
//! Build mirrors module init, `Drop` mirrors module exit:
//!
//! ```text
//! build(host)                         drop
//!   registry + control channel          remove hook (best effort)
//!   original slot + filter              drain registry
//!   load filter into host text          unload text
//!   hook descriptor(target, guard)
//!   install
//! ```
//!
//! The host is a generic parameter; `DefaultHideProc` runs on `MemHost`.

use std::fmt;
use std::sync::Arc;

use hideproc_core::enumerate::{CallGate, LoadedText};
use hideproc_core::error::Result;
use hideproc_core::host::Host;
use hideproc_core::{kerror, kinfo, kwarn};

use crate::channel::ControlChannel;
use crate::config::HideConfig;
use crate::filter::EnumerationFilter;
use crate::hook::{HookDescriptor, OriginalSlot};
use crate::mem_host::MemHost;
use crate::registry::HiddenRegistry;

/// A running hideproc bound to one host.
///
/// Owns the hook for its whole life; the host holds the filter text until
/// drop unloads it.
pub struct HideProc<H: Host> {
    host: Arc<H>,
    config: HideConfig,
    registry: Arc<HiddenRegistry>,
    channel: Arc<ControlChannel>,
    hook: HookDescriptor,
    text: LoadedText,
}

pub type DefaultHideProc = HideProc<MemHost>;

pub struct HideProcBuilder {
    config: HideConfig,
}

impl Default for HideProcBuilder {
    fn default() -> Self {
        Self {
            config: HideConfig::from_env(),
        }
    }
}

impl HideProcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: HideConfig) -> Self {
        self.config = config;
        self
    }

    /// Bring hideproc up on `host`.
    ///
    /// 1. Creates the registry and control channel
    /// 2. Creates the original slot and enumeration filter
    /// 3. Loads the filter into host text
    /// 4. Builds the hook descriptor with the configured guard
    /// 5. Installs the hook
    ///
    /// With `require_hook`, an install failure unloads the text and is
    /// returned. Without it, startup continues with enumeration unfiltered.
    pub fn build<H: Host + 'static>(self, host: Arc<H>) -> Result<HideProc<H>> {
        let config = self.config;
        config.validate()?;

        // 1. Registry + channel
        let registry = Arc::new(HiddenRegistry::new());
        let channel = Arc::new(ControlChannel::new(
            config.device_name.clone(),
            registry.clone(),
            config.max_write,
            config.dump_input,
        ));
        kinfo!("@ init: /dev/{}", config.device_name);

        // 2. Filter, reaching the original through the slot
        let original = Arc::new(OriginalSlot::new());
        let gate: Arc<dyn CallGate> = host.clone();
        let filter = EnumerationFilter::new(registry.clone(), original.clone(), gate);

        // 3. Replacement text
        let text = host.load_module(&config.device_name, Arc::new(filter))?;

        // 4. Descriptor
        let mut hook = HookDescriptor::new(
            config.target_symbol.clone(),
            text.entry,
            original,
            config.guard.build(text.range),
        );

        // 5. Install
        if let Err(e) = hook.install(host.as_ref()) {
            if config.require_hook {
                kerror!("init aborted: {}", e);
                // host -> text -> filter -> host
                host.unload_module(text.range);
                return Err(e);
            }
            kwarn!("continuing without hook: {}", e);
        }

        Ok(HideProc {
            host,
            config,
            registry,
            channel,
            hook,
            text,
        })
    }
}

impl<H: Host> HideProc<H> {
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &HideConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HiddenRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }

    pub fn hook(&self) -> &HookDescriptor {
        &self.hook
    }

    pub fn text(&self) -> LoadedText {
        self.text
    }

    pub fn hook_active(&self) -> bool {
        self.hook.is_installed()
    }

    /// Retry installation after a startup that ran without the hook.
    pub fn install_hook(&mut self) -> Result<()> {
        self.hook.install(self.host.as_ref())
    }

    /// Take the hook down early. Hidden entries stay registered.
    pub fn remove_hook(&mut self) -> Result<()> {
        self.hook.remove(self.host.as_ref())
    }
}

impl<H: Host> fmt::Debug for HideProc<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HideProc")
            .field("config", &self.config)
            .field("hook", &self.hook)
            .field("text", &self.text)
            .field("hidden", &self.registry.len())
            .finish()
    }
}

/// Ordered teardown: the hook goes first so no new call can enter the
/// filter, then the registry, then the text the filter lives in.
impl<H: Host> Drop for HideProc<H> {
    fn drop(&mut self) {
        if self.hook.is_installed() {
            if let Err(e) = self.hook.remove(self.host.as_ref()) {
                kerror!("exit: {}", e);
            }
        }
        self.registry.unhide_all(None);
        self.host.unload_module(self.text.range);
        kinfo!("@ exit");
    }
}
