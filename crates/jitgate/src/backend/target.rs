//! Target platform and data layout
//!
//! Routines are synthesized for the machine the engine runs on. A
//! [`TargetPlatform`] wraps the Cranelift ISA used to do so; a [`DataLayout`]
//! is the engine's own statement of pointer width and byte order, checked
//! against the ISA before anything is generated.

use std::sync::Arc;

use cranelift_codegen::ir::{self, Endianness};
use cranelift_codegen::isa::{CallConv, OwnedTargetIsa, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use target_lexicon::Architecture;

use crate::config::BridgeConfig;
use crate::error::RegistrationError;

/// Architectures the bridge can synthesize stubs for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    /// x86-64
    X86_64,
    /// AArch64
    AArch64,
}

impl TargetArch {
    fn of(architecture: Architecture) -> Option<Self> {
        match architecture {
            Architecture::X86_64 => Some(TargetArch::X86_64),
            Architecture::Aarch64(_) => Some(TargetArch::AArch64),
            _ => None,
        }
    }
}

/// Pointer width and byte order of the engine's values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    /// Size of a machine-word pointer in bytes
    pub pointer_bytes: u8,
    /// Byte order
    pub endianness: Endianness,
}

impl DataLayout {
    /// Layout of the running process
    pub fn host() -> Self {
        DataLayout {
            pointer_bytes: std::mem::size_of::<usize>() as u8,
            endianness: if cfg!(target_endian = "little") {
                Endianness::Little
            } else {
                Endianness::Big
            },
        }
    }

    /// Check that the layout agrees with the target ISA
    pub fn check(&self, target: &TargetPlatform) -> Result<(), RegistrationError> {
        let found = target.isa.pointer_bytes();
        if self.pointer_bytes != found {
            return Err(RegistrationError::DataLayoutMismatch {
                expected: self.pointer_bytes,
                found,
            });
        }
        if self.endianness != target.isa.endianness() {
            return Err(RegistrationError::UnsupportedTarget(format!(
                "data layout is {:?}-endian, target is {:?}-endian",
                self.endianness,
                target.isa.endianness()
            )));
        }
        Ok(())
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::host()
    }
}

/// The ISA routines are synthesized for
#[derive(Clone)]
pub struct TargetPlatform {
    isa: OwnedTargetIsa,
    arch: TargetArch,
}

impl TargetPlatform {
    /// Target the host machine with the optimization settings in `config`
    pub fn host(config: &BridgeConfig) -> Result<Self, RegistrationError> {
        let mut flag_builder = settings::builder();
        let settings = [
            ("opt_level", config.opt_level.as_setting()),
            ("enable_verifier", if config.enable_verifier { "true" } else { "false" }),
            // Stubs read their own frame pointer and return address
            ("preserve_frame_pointers", "true"),
            // Stubs embed absolute addresses of services and routines
            ("is_pic", "false"),
        ];
        for (name, value) in settings {
            flag_builder.set(name, value).map_err(|e| {
                RegistrationError::UnsupportedTarget(format!("Failed to set {}: {}", name, e))
            })?;
        }
        let flags = settings::Flags::new(flag_builder);

        let isa = cranelift_native::builder()
            .map_err(|e| RegistrationError::UnsupportedTarget(format!("Failed to create native ISA builder: {}", e)))?
            .finish(flags)
            .map_err(|e| RegistrationError::UnsupportedTarget(format!("Failed to finish ISA: {}", e)))?;

        Self::from_isa(isa)
    }

    /// Use a caller-built ISA.
    ///
    /// The ISA must describe the host architecture, keep frame pointers and
    /// produce non-PIC code; stubs run in this process and read their own
    /// frame.
    pub fn from_isa(isa: OwnedTargetIsa) -> Result<Self, RegistrationError> {
        let architecture = isa.triple().architecture;
        let arch = TargetArch::of(architecture)
            .ok_or_else(|| RegistrationError::UnsupportedTarget(format!("architecture {}", architecture)))?;

        if architecture != target_lexicon::HOST.architecture {
            return Err(RegistrationError::UnsupportedTarget(format!(
                "{} is not the host architecture {}",
                architecture,
                target_lexicon::HOST.architecture
            )));
        }
        if isa.pointer_bytes() != 8 {
            return Err(RegistrationError::UnsupportedTarget(format!(
                "{}-byte pointers",
                isa.pointer_bytes()
            )));
        }
        if !isa.flags().preserve_frame_pointers() {
            return Err(RegistrationError::UnsupportedTarget(
                "preserve_frame_pointers must be enabled".to_string(),
            ));
        }
        if isa.flags().is_pic() {
            return Err(RegistrationError::UnsupportedTarget(
                "position-independent code is not supported".to_string(),
            ));
        }

        Ok(TargetPlatform { isa, arch })
    }

    /// Target architecture
    pub fn arch(&self) -> TargetArch {
        self.arch
    }

    /// The Cranelift ISA
    pub fn isa(&self) -> &dyn TargetIsa {
        &*self.isa
    }

    /// Layout the ISA implies
    pub fn data_layout(&self) -> DataLayout {
        DataLayout {
            pointer_bytes: self.isa.pointer_bytes(),
            endianness: self.isa.endianness(),
        }
    }

    /// Cranelift type of a machine-word pointer
    pub fn pointer_type(&self) -> ir::Type {
        self.isa.pointer_type()
    }

    /// The platform C calling convention
    pub fn platform_call_conv(&self) -> CallConv {
        self.isa.default_call_conv()
    }

    pub(crate) fn owned_isa(&self) -> OwnedTargetIsa {
        Arc::clone(&self.isa)
    }
}

impl std::fmt::Debug for TargetPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetPlatform")
            .field("triple", &self.isa.triple().to_string())
            .field("arch", &self.arch)
            .finish()
    }
}
