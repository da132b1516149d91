//! # vnm
//!
//! Host-side entry point of the VM network driver. It decodes a VM
//! description, resolves the NICs the selected policy driver is responsible
//! for and prints them as JSON for the rule-applying drivers.
//!
//! ## Usage
//! ```bash
//! vnm nics "$VM_64" --deploy-id one-12 --hypervisor kvm
//! vnm select-driver < vm.b64
//! vnm --locking nics "$VM_64"
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Read;
use tracing::{debug, error};
use vnm_driver::{
    hypervisor, select_driver_base64, BridgeTable, DriverContext, DriverKind, HypervisorTag,
    NetworkDriver, NicRecord, VmDocument,
};

mod cli;
mod config;

use cli::{Args, Command, DriverChoice, VmArgs};

/// NICs resolved for one VM.
#[derive(Serialize)]
struct NicReport<'a> {
    driver: DriverKind,
    hypervisor: HypervisorTag,
    deploy_id: Option<&'a str>,
    nics: Vec<&'a NicRecord>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.log_json {
        vnm_common::init_logging_json(&args.log_level)?;
    } else {
        vnm_common::init_logging(&args.log_level)?;
    }

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting vnm");

    let settings = config::load(&args)?;
    let context = DriverContext::system(settings);

    if let Err(e) = run(args.command, context) {
        error!(error = %e, "vnm failed");
        return Err(e);
    }

    Ok(())
}

fn run(command: Command, context: DriverContext) -> Result<()> {
    match command {
        Command::Nics { vm, driver } => nics(vm, driver, context),
        Command::SelectDriver { vm_64 } => {
            let kind = select_driver_base64(&vm_description(vm_64)?)
                .context("Failed to classify VM description")?;
            println!("{}", kind);
            Ok(())
        }
        Command::Field { path, vm_64 } => {
            let document = VmDocument::from_base64(&vm_description(vm_64)?)
                .context("Failed to read VM description")?;
            if let Some(value) = document.field(&path) {
                println!("{}", value);
            }
            Ok(())
        }
        Command::Bridges => {
            let table = BridgeTable::load(
                context.commands.as_ref(),
                &context.settings.commands.brctl,
            );
            print_json(&table)
        }
        Command::Hypervisor => {
            println!("{}", hypervisor::detect(context.probe.as_ref()));
            Ok(())
        }
    }
}

fn nics(vm: VmArgs, choice: DriverChoice, context: DriverContext) -> Result<()> {
    let vm_64 = vm_description(vm.vm_64)?;
    let deploy_id = vm.deploy_id.as_deref();
    let hypervisor = vm.hypervisor.as_deref().map(HypervisorTag::from);

    let driver = match choice {
        DriverChoice::Auto => NetworkDriver::filter_driver(&vm_64, deploy_id, hypervisor, context),
        DriverChoice::Firewall => NetworkDriver::from_base64(
            DriverKind::LegacyFirewall, &vm_64, deploy_id, hypervisor, context,
        ),
        DriverChoice::SecurityGroup => NetworkDriver::from_base64(
            DriverKind::SecurityGroup, &vm_64, deploy_id, hypervisor, context,
        ),
    }
    .context("Failed to build network driver")?;

    driver.with_lock(|driver| {
        let mut nics = Vec::new();
        driver.process(|nic| nics.push(nic));

        print_json(&NicReport {
            driver: driver.kind(),
            hypervisor: driver.hypervisor(),
            deploy_id: driver.vm().deploy_id(),
            nics,
        })
    })
}

/// The VM description from the argument, or from stdin when absent.
fn vm_description(arg: Option<String>) -> Result<String> {
    match arg {
        Some(vm_64) => Ok(vm_64),
        None => {
            let mut vm_64 = String::new();
            std::io::stdin()
                .read_to_string(&mut vm_64)
                .context("Failed to read VM description from stdin")?;
            Ok(vm_64)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
