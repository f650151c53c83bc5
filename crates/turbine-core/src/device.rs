use std::fmt;

/// Compute device a tensor is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    /// Host CPU
    #[default]
    Cpu,
    /// CUDA GPU with device index
    Cuda(usize),
}

impl Device {
    /// Whether this is a CPU device.
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }

    /// Whether this is a CUDA device.
    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// Device index (0 for CPU).
    pub fn index(&self) -> usize {
        match self {
            Device::Cpu => 0,
            Device::Cuda(idx) => *idx,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

/// Execution-context identity of a tensor.
///
/// Two tensors may participate in one kernel call only when their contexts
/// compare equal; kernels never silently cross contexts. Numeric execution
/// in this workspace is host-side, so the context carries placement
/// identity only (device type + index), and scratch-arena entries are
/// keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceContext {
    device: Device,
}

impl DeviceContext {
    /// Context for the given device.
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// The host CPU context.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
        }
    }

    /// Device this context identifies.
    pub fn device(&self) -> Device {
        self.device
    }

    /// Device index within its type.
    pub fn device_id(&self) -> usize {
        self.device.index()
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.device)
    }
}
