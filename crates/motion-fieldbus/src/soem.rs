//! SOEM-backed EtherCAT transport (Linux only, feature `soem`).
//!
//! Implements [`BusTransport`] over the `soem` crate, which wraps the
//! Simple Open EtherCAT Master library.
//!
//! # Requirements
//!
//! - Linux with raw socket capabilities (CAP_NET_RAW) or root
//! - libsoem-dev installed or SOEM built from source

use crate::bus::{BusState, BusTransport, SlaveDiagnostics};
use motion_common::{MotionError, MotionResult};
use std::ffi::c_int;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for process data receive in microseconds.
const PROCESSDATA_TIMEOUT_US: c_int = 2_000;

/// Maximum number of slaves supported.
const MAX_SLAVES: usize = 128;

/// Maximum number of groups.
const MAX_GROUPS: usize = 2;

/// I/O map size (4KB as per SOEM API).
const IO_MAP_SIZE: usize = 4096;

/// Linux capability bit for CAP_NET_RAW.
const CAP_NET_RAW_BIT: u32 = 13;

/// Transport over the SOEM master library.
///
/// The SOEM context holds mutable references into the buffers below
/// and is created per operation; all calls must stay on one thread.
pub struct SoemTransport {
    interface: String,
    port: soem::Port,
    slaves: Vec<soem::Slave>,
    slave_count: c_int,
    groups: Vec<soem::Group>,
    esibuf: Vec<soem::ESIBuf>,
    esimap: Vec<soem::ESIMap>,
    elist: Vec<soem::ERing>,
    idxstack: Vec<soem::IdxStack>,
    ecaterror: Vec<soem::Boolean>,
    dc_time: i64,
    sm_commtype: Vec<soem::SMCommType>,
    pdo_assign: Vec<soem::PDOAssign>,
    pdo_desc: Vec<soem::PDODesc>,
    eep_sm: Vec<soem::EEPROMSM>,
    eep_fmmu: Vec<soem::EEPROMFMMU>,
    io_map: Box<[u8; IO_MAP_SIZE]>,
    image_size: usize,
    expected_wkc: u16,
    opened: bool,
}

impl SoemTransport {
    /// Create a transport. Nothing touches the network until `open`.
    pub fn new() -> Self {
        Self {
            interface: String::new(),
            port: soem::Port::default(),
            slaves: vec![soem::Slave::default(); MAX_SLAVES + 1], // +1 for master slot
            slave_count: 0,
            groups: vec![soem::Group::default(); MAX_GROUPS],
            esibuf: vec![soem::ESIBuf::default(); MAX_SLAVES],
            esimap: vec![soem::ESIMap::default(); MAX_SLAVES],
            elist: vec![soem::ERing::default(); MAX_SLAVES],
            idxstack: vec![soem::IdxStack::default(); MAX_SLAVES],
            ecaterror: vec![soem::Boolean::default(); MAX_SLAVES],
            dc_time: 0,
            sm_commtype: vec![soem::SMCommType::default(); MAX_SLAVES],
            pdo_assign: vec![soem::PDOAssign::default(); MAX_SLAVES],
            pdo_desc: vec![soem::PDODesc::default(); MAX_SLAVES],
            eep_sm: vec![soem::EEPROMSM::default(); MAX_SLAVES],
            eep_fmmu: vec![soem::EEPROMFMMU::default(); MAX_SLAVES],
            io_map: Box::new([0u8; IO_MAP_SIZE]),
            image_size: 0,
            expected_wkc: 0,
            opened: false,
        }
    }

    fn check_interface_exists(interface: &str) -> MotionResult<()> {
        let path = format!("/sys/class/net/{interface}");
        if !Path::new(&path).exists() {
            return Err(MotionError::EthernetDeviceUnavailable {
                interface: interface.to_string(),
            });
        }
        Ok(())
    }

    fn has_cap_net_raw() -> bool {
        let status = match fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(_) => return false,
        };

        for line in status.lines() {
            if let Some(value) = line.strip_prefix("CapEff:\t") {
                if let Ok(bits) = u64::from_str_radix(value.trim(), 16) {
                    return (bits & (1u64 << CAP_NET_RAW_BIT)) != 0;
                }
                break;
            }
        }
        false
    }

    fn check_raw_socket_privilege(interface: &str) -> MotionResult<()> {
        let is_root = unsafe { libc::geteuid() == 0 };
        if is_root || Self::has_cap_net_raw() {
            return Ok(());
        }
        Err(MotionError::EthernetDeviceUnavailable {
            interface: format!("{interface} (CAP_NET_RAW or root required for raw sockets)"),
        })
    }

    /// Run an operation against a freshly created SOEM context.
    ///
    /// The context borrows our buffers and cannot be stored, so it is
    /// rebuilt per call, matching the SOEM-rs ownership model. The I/O
    /// map is handed to the closure separately because the context does
    /// not own it but `config_map_group` wants it with the context's
    /// lifetime.
    fn with_context<F, T>(&mut self, f: F) -> MotionResult<T>
    where
        F: FnOnce(&mut soem::Context<'_>, &mut [u8; IO_MAP_SIZE]) -> MotionResult<T>,
    {
        // Safety: io_map is owned by this struct with a stable address
        // and outlives the per-call context; the cast only erases the
        // borrow region so it can unify with the context's lifetime.
        #[allow(unsafe_code)]
        let io_map: &mut [u8; IO_MAP_SIZE] =
            unsafe { &mut *(std::ptr::from_mut(&mut *self.io_map).cast::<[u8; IO_MAP_SIZE]>()) };

        let mut context = soem::Context::new(
            &[&self.interface],
            &mut self.port,
            &mut self.slaves,
            &mut self.slave_count,
            &mut self.groups,
            &mut self.esibuf,
            &mut self.esimap,
            &mut self.elist,
            &mut self.idxstack,
            &mut self.ecaterror,
            &mut self.dc_time,
            &mut self.sm_commtype,
            &mut self.pdo_assign,
            &mut self.pdo_desc,
            &mut self.eep_sm,
            &mut self.eep_fmmu,
        )
        .map_err(|e| {
            MotionError::Transport(format!(
                "failed to create SOEM context on {}: {:?}",
                self.interface, e
            ))
        })?;

        f(&mut context, io_map)
    }

    fn to_soem_state(state: BusState) -> soem::EtherCatState {
        match state {
            BusState::Offline | BusState::Init => soem::EtherCatState::Init,
            BusState::PreOp => soem::EtherCatState::PreOp,
            BusState::SafeOp => soem::EtherCatState::SafeOp,
            BusState::Operational => soem::EtherCatState::Op,
        }
    }

    fn from_soem_state(state: soem::EtherCatState) -> BusState {
        match state {
            soem::EtherCatState::Init => BusState::Init,
            soem::EtherCatState::PreOp => BusState::PreOp,
            soem::EtherCatState::SafeOp => BusState::SafeOp,
            soem::EtherCatState::Op => BusState::Operational,
            _ => BusState::Offline,
        }
    }
}

impl Default for SoemTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoemTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoemTransport")
            .field("interface", &self.interface)
            .field("slave_count", &self.slave_count)
            .field("expected_wkc", &self.expected_wkc)
            .finish_non_exhaustive()
    }
}

impl BusTransport for SoemTransport {
    fn open(&mut self, interface: &str) -> MotionResult<()> {
        if interface.is_empty() || interface == "simulated" {
            return Err(MotionError::EthernetDeviceUnavailable {
                interface: "no interface configured".to_string(),
            });
        }

        Self::check_interface_exists(interface)?;
        Self::check_raw_socket_privilege(interface)?;

        self.interface = interface.to_string();
        self.opened = true;
        info!(interface, "SOEM transport opened");
        Ok(())
    }

    fn configure(&mut self) -> MotionResult<usize> {
        let count = self.with_context(|ctx, _io| {
            ctx.config_init(false)
                .map_err(|e| MotionError::Transport(format!("slave configuration failed: {e:?}")))
        })?;
        info!(slave_count = count, "Slaves configured");
        Ok(count as usize)
    }

    fn map_image(&mut self) -> MotionResult<usize> {
        let expected_wkc = self.with_context(|ctx, io_map| {
            ctx.config_map_group(io_map, 0).map_err(|mut errors| {
                if let Some(e) = errors.next() {
                    MotionError::Transport(format!("failed to map I/O: {e:?}"))
                } else {
                    MotionError::Transport("failed to map I/O: unknown error".into())
                }
            })?;

            Ok(ctx.groups()[0].expected_wkc())
        })?;
        self.expected_wkc = expected_wkc;

        let mut size = 0usize;
        for idx in 1..=self.slave_count as usize {
            if let Some(slave) = self.slaves.get(idx) {
                size += slave.input_size() as usize + slave.output_size() as usize;
            }
        }
        self.image_size = size.min(IO_MAP_SIZE);
        debug!(
            image_size = self.image_size,
            expected_wkc = self.expected_wkc,
            "Process image mapped"
        );
        Ok(self.image_size)
    }

    fn expected_wkc(&self) -> u16 {
        self.expected_wkc
    }

    fn slave_count(&self) -> usize {
        self.slave_count as usize
    }

    fn stepper_count(&self) -> Option<usize> {
        // EEPROM identity does not distinguish stepper terminals from
        // other modules behind the same coupler; leave the count check
        // to configuration.
        None
    }

    fn request_state(&mut self, slave: u16, state: BusState) -> MotionResult<()> {
        let soem_state = Self::to_soem_state(state);
        debug!(slave, %state, "Requesting slave state");

        self.with_context(|ctx, _io| {
            ctx.set_state(soem_state, slave);
            ctx.write_state(slave)
                .map_err(|e| MotionError::Transport(format!("state write failed: {e:?}")))?;
            Ok(())
        })
    }

    fn check_state(&mut self, slave: u16, state: BusState, timeout: Duration) -> BusState {
        let soem_state = Self::to_soem_state(state);
        let timeout_us = timeout.as_micros().min(c_int::MAX as u128) as c_int;

        let reached = self.with_context(|ctx, _io| Ok(ctx.check_state(slave, soem_state, timeout_us)));
        match reached {
            Ok(s) => Self::from_soem_state(s),
            Err(e) => {
                warn!(error = %e, "State check failed");
                BusState::Offline
            }
        }
    }

    fn configure_dc(&mut self) -> MotionResult<bool> {
        self.with_context(|ctx, _io| {
            ctx.config_dc().map_err(|mut errors| {
                if let Some(e) = errors.next() {
                    MotionError::Transport(format!("DC configuration failed: {e:?}"))
                } else {
                    MotionError::Transport("DC configuration failed: unknown error".into())
                }
            })
        })
    }

    fn exchange(&mut self, image: &mut [u8]) -> MotionResult<u16> {
        let len = image.len().min(IO_MAP_SIZE);
        self.io_map[..len].copy_from_slice(&image[..len]);

        let wkc = self.with_context(|ctx, _io| {
            ctx.send_processdata();
            Ok(ctx.receive_processdata(PROCESSDATA_TIMEOUT_US))
        })?;

        image[..len].copy_from_slice(&self.io_map[..len]);
        Ok(wkc)
    }

    fn read_diagnostics(&mut self, slave: u16) -> MotionResult<SlaveDiagnostics> {
        let idx = slave as usize;
        let entry = self
            .slaves
            .get(idx)
            .ok_or_else(|| MotionError::Transport(format!("no such slave: {slave}")))?;

        Ok(SlaveDiagnostics {
            slave,
            state: Self::from_soem_state(entry.state()),
            al_status: 0,
            description: entry.name().to_string(),
        })
    }

    fn close(&mut self) -> MotionResult<()> {
        if self.opened {
            info!(interface = %self.interface, "Closing SOEM transport");
            self.opened = false;
            self.slave_count = 0;
            self.expected_wkc = 0;
        }
        Ok(())
    }
}
