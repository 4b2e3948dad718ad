//! EtherCAT bus lifecycle controller.
//!
//! Takes the fieldbus from uninitialized through configuration,
//! Safe-Operational and Operational, validating the working counter and
//! per-slave state at each step, and runs the cyclic process-data
//! exchange once the bus is up. Frame transmission and slave discovery
//! live behind [`BusTransport`], with a simulated backend for tests and
//! a SOEM-backed one for hardware (feature `soem`).

#[cfg(any(test, feature = "simulated"))]
use crate::image::layout;
use crate::image::{DeviceMap, ProcessImage};
use crate::stepper::Steppers;
use motion_common::{BusConfig, MotionError, MotionResult};
#[cfg(any(test, feature = "simulated"))]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(any(test, feature = "simulated"))]
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Bus and slave application-layer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    /// Network device not opened.
    #[default]
    Offline,
    /// Device open, slaves not yet configured.
    Init,
    /// Mailboxes configured.
    PreOp,
    /// Process image mapped, outputs not yet live.
    SafeOp,
    /// Full cyclic operation.
    Operational,
}

impl std::fmt::Display for BusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "OFFLINE"),
            Self::Init => write!(f, "INIT"),
            Self::PreOp => write!(f, "PRE_OP"),
            Self::SafeOp => write!(f, "SAFE_OP"),
            Self::Operational => write!(f, "OP"),
        }
    }
}

/// Per-slave status snapshot, read when a state transition fails.
#[derive(Debug, Clone)]
pub struct SlaveDiagnostics {
    /// 1-based slave position on the bus.
    pub slave: u16,
    /// Application-layer state the slave reports.
    pub state: BusState,
    /// AL status code from the slave's registers.
    pub al_status: u16,
    /// Human-readable description of the status code.
    pub description: String,
}

/// Working-counter accounting for the cyclic exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeStats {
    /// Total completed exchange cycles.
    pub cycles: u64,
    /// Exchanges whose working counter fell short of expected.
    pub wkc_errors: u64,
    /// Working counter of the most recent exchange.
    pub last_wkc: u16,
}

/// Transport boundary to the EtherCAT master library.
///
/// Slave index 0 addresses all slaves (broadcast), matching the
/// master-library convention; individual slaves are 1-based.
pub trait BusTransport: Send {
    /// Open the network device.
    fn open(&mut self, interface: &str) -> MotionResult<()>;

    /// Scan and configure slave mailboxes, returning the slave count.
    fn configure(&mut self) -> MotionResult<usize>;

    /// Map the process image, returning its total size in bytes.
    fn map_image(&mut self) -> MotionResult<usize>;

    /// Expected working counter for a full exchange
    /// (2 per slave with outputs plus 1 per slave with inputs).
    fn expected_wkc(&self) -> u16;

    /// Number of configured slaves.
    fn slave_count(&self) -> usize;

    /// Number of slaves identified as stepper terminals, or `None` if
    /// the transport cannot classify slaves.
    fn stepper_count(&self) -> Option<usize>;

    /// Request a state transition for one slave (0 = all).
    fn request_state(&mut self, slave: u16, state: BusState) -> MotionResult<()>;

    /// Wait up to `timeout` for a slave to reach `state`; returns the
    /// state actually observed.
    fn check_state(&mut self, slave: u16, state: BusState, timeout: Duration) -> BusState;

    /// Enable distributed-clock synchronization. Returns whether any
    /// DC-capable slave was configured.
    fn configure_dc(&mut self) -> MotionResult<bool> {
        Ok(false)
    }

    /// One send-then-receive process-data exchange over the full
    /// image buffer. Returns the working counter.
    fn exchange(&mut self, image: &mut [u8]) -> MotionResult<u16>;

    /// Read a slave's state and AL status for failure diagnostics.
    fn read_diagnostics(&mut self, slave: u16) -> MotionResult<SlaveDiagnostics>;

    /// Release the network device.
    fn close(&mut self) -> MotionResult<()>;
}

/// The bus context: transport, process image and bound device map.
///
/// Owned behind a mutex by the runtime; both the cyclic exchange thread
/// and the mode sequencer lock it for the duration of one exchange or
/// one sequencer step.
pub struct EthercatBus {
    config: BusConfig,
    transport: Box<dyn BusTransport>,
    state: BusState,
    image: ProcessImage,
    map: Option<DeviceMap>,
    expected_wkc: u16,
    stats: ExchangeStats,
    opened: bool,
}

impl std::fmt::Debug for EthercatBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthercatBus")
            .field("state", &self.state)
            .field("interface", &self.config.interface)
            .field("image_len", &self.image.len())
            .field("cycles", &self.stats.cycles)
            .finish()
    }
}

impl EthercatBus {
    /// Create a bus over the given transport. Nothing is opened yet.
    pub fn new(config: BusConfig, transport: Box<dyn BusTransport>) -> Self {
        Self {
            config,
            transport,
            state: BusState::Offline,
            image: ProcessImage::default(),
            map: None,
            expected_wkc: 0,
            stats: ExchangeStats::default(),
            opened: false,
        }
    }

    /// Current master-side bus state.
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Working-counter statistics.
    pub fn stats(&self) -> ExchangeStats {
        self.stats
    }

    /// Expected working counter once the image is mapped.
    pub fn expected_wkc(&self) -> u16 {
        self.expected_wkc
    }

    /// Borrow the stepper driver view over the bound image.
    ///
    /// # Errors
    ///
    /// [`MotionError::DevicesUnbound`] before device offsets have been
    /// bound (bus not yet Operational).
    pub fn steppers(&mut self) -> MotionResult<Steppers<'_>> {
        let map = self.map.as_ref().ok_or(MotionError::DevicesUnbound)?;
        Ok(Steppers::new(&mut self.image, map))
    }

    /// Full bring-up: configure, Safe-Operational, Operational.
    ///
    /// On any failure the network handle is released before the error
    /// is returned; no step is retried.
    ///
    /// # Errors
    ///
    /// Any fatal bring-up error from the staged methods below.
    pub fn start(&mut self) -> MotionResult<()> {
        let result = self
            .open_and_configure()
            .and_then(|()| self.enter_safe_op())
            .and_then(|()| self.enter_operational());

        if let Err(e) = result {
            self.close_once();
            return Err(e);
        }
        Ok(())
    }

    /// Open the network device and configure slave mailboxes (PreOp).
    ///
    /// # Errors
    ///
    /// [`MotionError::EthernetDeviceUnavailable`] if the device cannot
    /// be opened; [`MotionError::ConfigurationFailed`] if no slave
    /// answers configuration or the count mismatches the expected one.
    /// The handle is closed before a configuration error is returned.
    pub fn open_and_configure(&mut self) -> MotionResult<()> {
        let interface = self
            .config
            .interface
            .clone()
            .unwrap_or_else(|| "simulated".into());

        info!(interface = %interface, "Opening EtherCAT network device");
        self.transport.open(&interface)?;
        self.opened = true;
        self.state = BusState::Init;

        let found = self.transport.configure()?;
        let expected = self.config.expected_slaves;
        if found == 0 || (expected > 0 && found != expected) {
            error!(found, expected, "Slave configuration failed");
            self.close_once();
            return Err(MotionError::ConfigurationFailed { found, expected });
        }

        // PreOp confirmation is informational; some terminals proceed
        // to SAFE_OP fine without acknowledging PRE_OP here.
        let reached = self
            .transport
            .check_state(0, BusState::PreOp, self.config.state_timeout);
        if reached != BusState::PreOp {
            warn!(%reached, "Not all slaves confirmed PRE_OP");
        }

        self.state = BusState::PreOp;
        info!(slaves = found, "Slaves configured, bus in PRE_OP");
        Ok(())
    }

    /// Map the process image and wait for Safe-Operational.
    ///
    /// # Errors
    ///
    /// [`MotionError::SafeOperationalNotReached`] if the slaves do not
    /// reach SAFE_OP within three times the base state timeout. Each
    /// offending slave's state and AL status are logged first.
    pub fn enter_safe_op(&mut self) -> MotionResult<()> {
        if self.state != BusState::PreOp {
            return Err(MotionError::Transport(format!(
                "cannot enter SAFE_OP from {}",
                self.state
            )));
        }

        let size = self.transport.map_image()?;
        self.image = ProcessImage::new(size);
        self.expected_wkc = self.transport.expected_wkc();
        debug!(
            image_len = size,
            expected_wkc = self.expected_wkc,
            "Process image mapped"
        );

        let timeout = self.config.state_timeout * 3;
        let reached = self.transport.check_state(0, BusState::SafeOp, timeout);
        if reached != BusState::SafeOp {
            self.log_slave_diagnostics();
            return Err(MotionError::SafeOperationalNotReached);
        }

        if self.config.dc_enabled {
            match self.transport.configure_dc() {
                Ok(true) => info!("Distributed clocks configured"),
                Ok(false) => debug!("No DC-capable slaves"),
                // DC is an optional collaborator; basic operation works without it
                Err(e) => warn!(error = %e, "DC configuration failed"),
            }
        }

        self.state = BusState::SafeOp;
        info!("All slaves in SAFE_OP");
        Ok(())
    }

    /// Request Operational, confirm it, and bind device offsets.
    ///
    /// One exchange is performed after the request so the slaves see
    /// valid outgoing process data and accept the transition.
    ///
    /// # Errors
    ///
    /// [`MotionError::OperationalNotReached`] on timeout, or a binding
    /// error from [`DeviceMap::bind`].
    pub fn enter_operational(&mut self) -> MotionResult<()> {
        if self.state != BusState::SafeOp {
            return Err(MotionError::Transport(format!(
                "cannot enter OP from {}",
                self.state
            )));
        }

        self.transport.request_state(0, BusState::Operational)?;
        self.exchange()?;

        let reached =
            self.transport
                .check_state(0, BusState::Operational, self.config.state_timeout);
        if reached != BusState::Operational {
            self.log_slave_diagnostics();
            return Err(MotionError::OperationalNotReached);
        }

        let map = DeviceMap::bind(
            &self.config.devices,
            self.image.len(),
            self.transport.stepper_count(),
        )?;
        info!(
            devices = map.len(),
            image_len = self.image.len(),
            "Bus OPERATIONAL, device offsets bound"
        );
        self.map = Some(map);
        self.state = BusState::Operational;
        Ok(())
    }

    /// One process-data exchange over the whole image.
    ///
    /// Valid in SAFE_OP (inputs only are meaningful) and OPERATIONAL.
    /// A short working counter is logged and counted, not fatal; the
    /// mode sequencer stalls on its own if a device stops answering.
    ///
    /// # Errors
    ///
    /// [`MotionError::Transport`] if called before the image is mapped
    /// or if the transport fails outright.
    pub fn exchange(&mut self) -> MotionResult<u16> {
        if self.state != BusState::Operational && self.state != BusState::SafeOp {
            return Err(MotionError::Transport(format!(
                "cannot exchange in {}",
                self.state
            )));
        }

        let wkc = self.transport.exchange(self.image.as_mut_slice())?;
        self.stats.cycles += 1;
        self.stats.last_wkc = wkc;

        if wkc < self.expected_wkc {
            self.stats.wkc_errors += 1;
            warn!(
                wkc,
                expected = self.expected_wkc,
                cycle = self.stats.cycles,
                "Working counter short"
            );
        } else {
            trace!(wkc, cycle = self.stats.cycles, "Exchange complete");
        }

        Ok(wkc)
    }

    /// Drop from OPERATIONAL back to SAFE_OP.
    ///
    /// # Errors
    ///
    /// Transport failure while requesting the transition.
    pub fn leave_operational(&mut self) -> MotionResult<()> {
        if self.state == BusState::Operational {
            self.transport.request_state(0, BusState::SafeOp)?;
            self.state = BusState::SafeOp;
            info!("Bus back in SAFE_OP");
        }
        Ok(())
    }

    /// Drop from SAFE_OP back to PRE_OP.
    ///
    /// # Errors
    ///
    /// Transport failure while requesting the transition.
    pub fn leave_safe_op(&mut self) -> MotionResult<()> {
        if self.state == BusState::SafeOp {
            self.transport.request_state(0, BusState::PreOp)?;
            self.state = BusState::PreOp;
            info!("Bus back in PRE_OP");
        }
        Ok(())
    }

    /// Walk the state chain back to INIT and release the device.
    ///
    /// Safe to call in any state and after a failed bring-up; the
    /// handle is closed at most once.
    ///
    /// # Errors
    ///
    /// Transport failure during the reverse transitions.
    pub fn shut_down(&mut self) -> MotionResult<()> {
        info!("Shutting down EtherCAT bus");

        self.leave_operational()?;
        self.leave_safe_op()?;

        if self.state == BusState::PreOp {
            self.transport.request_state(0, BusState::Init)?;
            self.state = BusState::Init;
        }

        self.close_once();
        self.state = BusState::Offline;

        info!(
            total_cycles = self.stats.cycles,
            wkc_errors = self.stats.wkc_errors,
            "Bus shutdown complete"
        );
        Ok(())
    }

    fn close_once(&mut self) {
        if self.opened {
            if let Err(e) = self.transport.close() {
                warn!(error = %e, "Transport close failed");
            }
            self.opened = false;
        }
    }

    fn log_slave_diagnostics(&mut self) {
        for slave in 1..=self.transport.slave_count() as u16 {
            match self.transport.read_diagnostics(slave) {
                Ok(diag) => error!(
                    slave = diag.slave,
                    state = %diag.state,
                    al_status = format!("{:#06x}", diag.al_status),
                    description = %diag.description,
                    "Slave state check failed"
                ),
                Err(e) => error!(slave, error = %e, "Diagnostics unavailable"),
            }
        }
    }
}

/// Simulated EtherCAT transport for testing without hardware.
///
/// Implements a hardware echo: after each exchange, every device's
/// output region is mirrored into its input region, and the status
/// byte is synthesized (busy while a started move is under way,
/// on-target once it completes).
#[cfg(any(test, feature = "simulated"))]
#[derive(Debug)]
pub struct SimulatedTransport {
    slave_count: usize,
    devices: Vec<motion_common::DeviceOffsets>,
    image_size: usize,
    steppers: Option<usize>,
    current_state: BusState,
    open: bool,
    muted: Vec<usize>,
    on_target_after: u64,
    start_age: Vec<Option<u64>>,
    forced_wkc: Option<u16>,
    reach_safe_op: bool,
    close_count: Arc<AtomicUsize>,
}

#[cfg(any(test, feature = "simulated"))]
impl SimulatedTransport {
    /// Create a transport simulating `slave_count` stepper terminals
    /// at the given region offsets.
    pub fn new(slave_count: usize, devices: &[motion_common::DeviceOffsets]) -> Self {
        let image_size = devices
            .iter()
            .map(|d| d.output.max(d.input) + layout::REGION_LEN)
            .max()
            .unwrap_or(layout::REGION_LEN);
        Self {
            slave_count,
            devices: devices.to_vec(),
            image_size,
            steppers: Some(devices.len().min(slave_count)),
            current_state: BusState::Offline,
            open: false,
            muted: Vec::new(),
            on_target_after: 2,
            start_age: vec![None; devices.len()],
            forced_wkc: None,
            reach_safe_op: true,
            close_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the stepper classification result.
    pub fn with_steppers(mut self, steppers: Option<usize>) -> Self {
        self.steppers = steppers;
        self
    }

    /// Force every exchange to return this working counter.
    pub fn with_forced_wkc(mut self, wkc: u16) -> Self {
        self.forced_wkc = Some(wkc);
        self
    }

    /// Number of exchanges after `start` before on-target is reported.
    pub fn with_on_target_after(mut self, cycles: u64) -> Self {
        self.on_target_after = cycles;
        self
    }

    /// Simulate slaves that never reach SAFE_OP.
    pub fn failing_safe_op(mut self) -> Self {
        self.reach_safe_op = false;
        self
    }

    /// Stop echoing a device's outputs (an unresponsive terminal).
    pub fn mute_device(&mut self, device: usize) {
        if !self.muted.contains(&device) {
            self.muted.push(device);
        }
    }

    /// Handle onto the close counter, kept by tests before boxing.
    pub fn close_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.close_count)
    }

    fn echo_device(&mut self, image: &mut [u8], device: usize) {
        let out = self.devices[device].output;
        let inp = self.devices[device].input;

        // Mirror commands back, except the synthesized status byte
        for field in 0..layout::REGION_LEN {
            if field != layout::STATUS {
                image[inp + field] = image[out + field];
            }
        }

        let control = image[out + layout::CONTROL];
        if control & layout::CTL_START != 0 {
            let age = self.start_age[device].unwrap_or(0) + 1;
            self.start_age[device] = Some(age);
            image[inp + layout::STATUS] = if age >= self.on_target_after {
                layout::STA_ON_TARGET | layout::STA_STANDSTILL
            } else {
                layout::STA_BUSY
            };
        } else {
            self.start_age[device] = None;
            image[inp + layout::STATUS] = layout::STA_STANDSTILL;
        }
    }
}

#[cfg(any(test, feature = "simulated"))]
impl BusTransport for SimulatedTransport {
    fn open(&mut self, interface: &str) -> MotionResult<()> {
        debug!(interface, "Simulated transport opened");
        self.open = true;
        self.current_state = BusState::Init;
        Ok(())
    }

    fn configure(&mut self) -> MotionResult<usize> {
        if !self.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        if self.slave_count > 0 {
            self.current_state = BusState::PreOp;
        }
        Ok(self.slave_count)
    }

    fn map_image(&mut self) -> MotionResult<usize> {
        if !self.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        if self.reach_safe_op {
            self.current_state = BusState::SafeOp;
        }
        Ok(self.image_size)
    }

    fn expected_wkc(&self) -> u16 {
        // Every simulated slave carries both outputs and inputs
        (self.slave_count * 3) as u16
    }

    fn slave_count(&self) -> usize {
        self.slave_count
    }

    fn stepper_count(&self) -> Option<usize> {
        self.steppers
    }

    fn request_state(&mut self, slave: u16, state: BusState) -> MotionResult<()> {
        if !self.open {
            return Err(MotionError::Transport("transport not open".into()));
        }
        debug!(slave, %state, "Simulated state request");
        self.current_state = state;
        Ok(())
    }

    fn check_state(&mut self, _slave: u16, _state: BusState, _timeout: Duration) -> BusState {
        self.current_state
    }

    fn exchange(&mut self, image: &mut [u8]) -> MotionResult<u16> {
        if !self.open {
            return Err(MotionError::Transport("transport not open".into()));
        }

        for device in 0..self.devices.len() {
            if !self.muted.contains(&device) && self.devices[device].input + layout::REGION_LEN <= image.len() {
                self.echo_device(image, device);
            }
        }

        Ok(self.forced_wkc.unwrap_or_else(|| self.expected_wkc()))
    }

    fn read_diagnostics(&mut self, slave: u16) -> MotionResult<SlaveDiagnostics> {
        // AL status 0x0011: invalid requested state change
        let (al_status, description) = if self.reach_safe_op {
            (0, "simulated slave".to_string())
        } else {
            (0x0011, "simulated slave refusing state change".to_string())
        };
        Ok(SlaveDiagnostics {
            slave,
            state: self.current_state,
            al_status,
            description,
        })
    }

    fn close(&mut self) -> MotionResult<()> {
        self.open = false;
        self.current_state = BusState::Offline;
        self.close_count.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated transport closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_common::BusConfig;

    fn test_bus() -> EthercatBus {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices);
        EthercatBus::new(config, Box::new(transport))
    }

    #[test]
    fn test_full_bring_up() {
        let mut bus = test_bus();
        bus.start().unwrap();
        assert_eq!(bus.state(), BusState::Operational);
        assert_eq!(bus.expected_wkc(), 9);
        assert_eq!(bus.steppers().unwrap().count(), 3);
    }

    #[test]
    fn test_steppers_unusable_before_binding() {
        let mut bus = test_bus();
        assert!(matches!(
            bus.steppers().unwrap_err(),
            MotionError::DevicesUnbound
        ));

        bus.open_and_configure().unwrap();
        bus.enter_safe_op().unwrap();
        // Still SAFE_OP: offsets bound only once OPERATIONAL
        assert!(bus.steppers().is_err());
    }

    #[test]
    fn test_exchange_echoes_commands() {
        let mut bus = test_bus();
        bus.start().unwrap();

        bus.steppers().unwrap().enter_setup(1);
        bus.exchange().unwrap();

        let steppers = bus.steppers().unwrap();
        assert!(steppers.confirm_setup(1));
        assert!(!steppers.confirm_terminated(1));
    }

    #[test]
    fn test_zero_slaves_fails_and_closes_once() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(0, &config.devices);
        let closes = transport.close_counter();
        let mut bus = EthercatBus::new(config, Box::new(transport));

        let err = bus.start().unwrap_err();
        assert!(matches!(
            err,
            MotionError::ConfigurationFailed {
                found: 0,
                expected: 0
            }
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // A later shutdown must not double-close
        bus.shut_down().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slave_count_mismatch_vs_expected() {
        let mut config = BusConfig::default();
        config.expected_slaves = 5;
        let transport = SimulatedTransport::new(3, &config.devices);
        let mut bus = EthercatBus::new(config, Box::new(transport));

        assert!(matches!(
            bus.start().unwrap_err(),
            MotionError::ConfigurationFailed {
                found: 3,
                expected: 5
            }
        ));
    }

    #[test]
    fn test_safe_op_timeout() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices).failing_safe_op();
        let closes = transport.close_counter();
        let mut bus = EthercatBus::new(config, Box::new(transport));

        assert!(matches!(
            bus.start().unwrap_err(),
            MotionError::SafeOperationalNotReached
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stepper_count_mismatch_is_fatal() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices).with_steppers(Some(2));
        let mut bus = EthercatBus::new(config, Box::new(transport));

        assert!(matches!(
            bus.start().unwrap_err(),
            MotionError::DeviceCountMismatch {
                configured: 3,
                discovered: 2
            }
        ));
    }

    #[test]
    fn test_unclassified_steppers_skip_count_check() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(5, &config.devices).with_steppers(None);
        let mut bus = EthercatBus::new(config, Box::new(transport));
        bus.start().unwrap();
        assert_eq!(bus.steppers().unwrap().count(), 3);
    }

    #[test]
    fn test_wkc_shortfall_counted_not_fatal() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices).with_forced_wkc(4);
        let mut bus = EthercatBus::new(config, Box::new(transport));
        bus.start().unwrap();

        for _ in 0..5 {
            bus.exchange().unwrap();
        }

        let stats = bus.stats();
        assert_eq!(stats.last_wkc, 4);
        // One exchange happens during enter_operational as well
        assert_eq!(stats.wkc_errors, stats.cycles);
    }

    #[test]
    fn test_shutdown_reverse_sequence() {
        let config = BusConfig::default();
        let transport = SimulatedTransport::new(3, &config.devices);
        let closes = transport.close_counter();
        let mut bus = EthercatBus::new(config, Box::new(transport));

        bus.start().unwrap();
        bus.shut_down().unwrap();

        assert_eq!(bus.state(), BusState::Offline);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(bus.exchange().is_err());
    }

    #[test]
    fn test_staged_teardown_for_host_hooks() {
        let mut bus = test_bus();
        bus.start().unwrap();

        bus.leave_operational().unwrap();
        assert_eq!(bus.state(), BusState::SafeOp);
        bus.leave_safe_op().unwrap();
        assert_eq!(bus.state(), BusState::PreOp);
        bus.shut_down().unwrap();
        assert_eq!(bus.state(), BusState::Offline);
    }
}
