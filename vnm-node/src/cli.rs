//! Command-line argument parsing.

use clap::{Parser, Subcommand, ValueEnum};

/// vnm - VM network driver
#[derive(Parser, Debug)]
#[command(name = "vnm")]
#[command(about = "Resolve the NICs of a VM description and select its network policy driver")]
#[command(version)]
pub struct Args {
    /// Path to settings file (optional, defaults used if not found)
    #[arg(short, long, env = "VNM_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Serialize driver runs with the advisory driver lock
    #[arg(long)]
    pub locking: bool,

    /// Directory for driver lock files
    #[arg(long)]
    pub lock_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve the NICs handled by the policy driver and print them as JSON
    Nics {
        #[command(flatten)]
        vm: VmArgs,

        /// Policy driver (auto selects from the description)
        #[arg(long, value_enum, default_value = "auto")]
        driver: DriverChoice,
    },

    /// Print the policy driver selected for a VM description
    SelectDriver {
        /// Base64 encoded VM description (read from stdin if omitted)
        vm_64: Option<String>,
    },

    /// Print the text of an element of a VM description
    Field {
        /// Path of the element, relative to the VM root (e.g. TEMPLATE/NIC/MAC)
        path: String,

        /// Base64 encoded VM description (read from stdin if omitted)
        vm_64: Option<String>,
    },

    /// Print the host bridges and their interfaces as JSON
    Bridges,

    /// Print the detected hypervisor
    Hypervisor,
}

/// VM description and runtime identity.
#[derive(clap::Args, Debug)]
pub struct VmArgs {
    /// Base64 encoded VM description (read from stdin if omitted)
    pub vm_64: Option<String>,

    /// Hypervisor deploy id ("-" if the VM is not deployed)
    #[arg(long)]
    pub deploy_id: Option<String>,

    /// Hypervisor (kvm, xen); detected from the host if omitted
    #[arg(long)]
    pub hypervisor: Option<String>,
}

/// Policy driver choice.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverChoice {
    Auto,
    Firewall,
    SecurityGroup,
}
