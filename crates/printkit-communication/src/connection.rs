//! Printer connection
//!
//! [`PrinterConnection`] is the public handle: it spawns one IO task per
//! connection and feeds it through a command channel. The IO task owns the
//! transport and the whole protocol state (single-threaded mutation); the
//! handle only reads shared snapshots.
//!
//! The IO loop runs four phases per iteration: read one line, drain the
//! command channel, service timers, transmit at most one frame when the
//! send credit allows it.

use crate::feedback::FeedbackMatcher;
use crate::heaters::HeaterModel;
use crate::job::{PrintJob, SdResidentPrintJob, SdStreamingUploadJob};
use crate::protocol::parsers::{firmware, position, sd as sd_parser, temperature};
use crate::protocol::{codec, lines, CommandScheduler, FirmwareLine, ProtocolDialect, SendRecord};
use crate::scripts::{self, ScriptContext};
use crate::sdcard::SdCardState;
use crate::transport::open_transport;
use parking_lot::RwLock;
use printkit_core::error::{ProtocolError, Result};
use printkit_core::{
    ConnectionConfig, ConnectionState, EventDispatcher, FirmwareInfo, HeaterId, PositionRecord,
    PrintProgress, PrinterEvent, PrinterListener, PrinterListenerHandle, ScriptEvent, SdFile,
    TemperatureRecord, BAUDRATE_CANDIDATES,
};
use printkit_virtualprinter::VirtualPrinterSettings;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Commands the public handle feeds into the IO task
#[derive(Debug)]
enum ConnectionCommand {
    Send(String),
    StartPrint(PrintJob),
    StartSdPrint,
    CancelPrint,
    SetPause(bool),
    StartFileTransfer { local: PathBuf, remote: String },
    SelectSdFile(String),
    RefreshSdFiles,
    InitSdCard,
    ReleaseSdCard,
    DeleteSdFile(String),
    StartSdFileTransfer(String),
    EndSdFileTransfer,
    SetTemperatureOffsets(BTreeMap<HeaterId, f64>),
    SetFeedrateMultiplier(f64),
    SetFlowrateMultiplier(f64),
    SetScriptContext(ScriptContext),
    Disconnect,
}

/// Snapshots readable without touching the IO task
struct SharedState {
    state: RwLock<ConnectionState>,
    error: RwLock<Option<String>>,
    baud: RwLock<u32>,
    temperatures: RwLock<TemperatureRecord>,
    position: RwLock<PositionRecord>,
    progress: RwLock<Option<PrintProgress>>,
    firmware: RwLock<FirmwareInfo>,
    sd_files: RwLock<Vec<SdFile>>,
    listeners: RwLock<HashMap<String, Arc<dyn PrinterListener>>>,
    events: EventDispatcher,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Offline),
            error: RwLock::new(None),
            baud: RwLock::new(0),
            temperatures: RwLock::new(TemperatureRecord::new()),
            position: RwLock::new(PositionRecord::new()),
            progress: RwLock::new(None),
            firmware: RwLock::new(FirmwareInfo::new()),
            sd_files: RwLock::new(Vec::new()),
            listeners: RwLock::new(HashMap::new()),
            events: EventDispatcher::default(),
        }
    }
}

/// A connection to one printer
pub struct PrinterConnection {
    config: ConnectionConfig,
    shared: Arc<SharedState>,
    command_tx: Arc<RwLock<Option<mpsc::UnboundedSender<ConnectionCommand>>>>,
    io_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl PrinterConnection {
    /// Create a connection for the given configuration. Nothing is opened
    /// until [`connect`](Self::connect) is called.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            shared: Arc::new(SharedState::new()),
            command_tx: Arc::new(RwLock::new(None)),
            io_task: Arc::new(RwLock::new(None)),
        }
    }

    /// Open the port and start the IO task. Returns once the task is
    /// running; progress is reported through events and listeners.
    pub fn connect(&self) -> Result<()> {
        self.connect_with(None)
    }

    /// Like [`connect`](Self::connect), with explicit virtual printer
    /// settings for the `VIRTUAL` port
    pub fn connect_with(&self, virtual_settings: Option<VirtualPrinterSettings>) -> Result<()> {
        if self.command_tx.read().is_some() {
            return Err(ProtocolError::InvalidState {
                operation: "connect".to_string(),
                state: self.state().to_string(),
            }
            .into());
        }

        let transport = open_transport(&self.config, virtual_settings)?;
        *self.shared.baud.write() = transport.baud_rate();

        let (tx, rx) = mpsc::unbounded_channel();
        *self.command_tx.write() = Some(tx);

        let machine = ProtocolMachine::new(self.config.clone(), transport);
        let shared = self.shared.clone();
        let handle = tokio::spawn(io_loop(machine, rx, shared));
        *self.io_task.write() = Some(handle);
        Ok(())
    }

    /// Close the connection, dropping queued work
    pub async fn disconnect(&self) {
        self.send_internal(ConnectionCommand::Disconnect);
        let handle = self.io_task.write().take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        *self.command_tx.write() = None;
    }

    /// Queue a command for sending
    ///
    /// Rejected unless the connection state accepts live I/O; `M112` is
    /// always let through so an emergency stop cannot be gated.
    pub fn send_command(&self, command: impl Into<String>) -> Result<()> {
        let command = command.into();
        let state = self.state();
        let is_emergency = codec::command_code(&command).as_deref() == Some("M112");
        if !state.accepts_commands() && !is_emergency {
            return Err(ProtocolError::InvalidState {
                operation: format!("send {}", command),
                state: state.to_string(),
            }
            .into());
        }
        self.send_internal(ConnectionCommand::Send(command));
        Ok(())
    }

    /// Start a print from a job source
    pub fn start_print(&self, job: PrintJob) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Operational {
            return Err(ProtocolError::InvalidState {
                operation: "start print".to_string(),
                state: state.to_string(),
            }
            .into());
        }
        self.send_internal(ConnectionCommand::StartPrint(job));
        Ok(())
    }

    /// Start printing a local G-code file
    pub fn start_local_print(&self, path: impl Into<PathBuf>) -> Result<()> {
        let job = PrintJob::Local(crate::job::LocalGcodeJob::open(path.into())?);
        self.start_print(job)
    }

    /// Start printing the file previously selected on the SD card (`M24`)
    pub fn start_sd_print(&self) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Operational {
            return Err(ProtocolError::InvalidState {
                operation: "start SD print".to_string(),
                state: state.to_string(),
            }
            .into());
        }
        self.send_internal(ConnectionCommand::StartSdPrint);
        Ok(())
    }

    /// Cancel the active print. Non-blocking; the IO task drains to the
    /// cancel script.
    pub fn cancel_print(&self) {
        self.send_internal(ConnectionCommand::CancelPrint);
    }

    /// Pause or resume the active print
    pub fn set_pause(&self, paused: bool) {
        self.send_internal(ConnectionCommand::SetPause(paused));
    }

    /// Stream a local file to the printer's SD card (`M28`/`M29`)
    pub fn start_file_transfer(
        &self,
        local: impl Into<PathBuf>,
        remote: impl Into<String>,
    ) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Operational {
            return Err(ProtocolError::InvalidState {
                operation: "start file transfer".to_string(),
                state: state.to_string(),
            }
            .into());
        }
        self.send_internal(ConnectionCommand::StartFileTransfer {
            local: local.into(),
            remote: remote.into(),
        });
        Ok(())
    }

    /// Select a file for printing; `sd` selects on the printer's card
    pub fn select_file(&self, name: impl Into<String>, sd: bool) -> Result<()> {
        if sd {
            self.send_internal(ConnectionCommand::SelectSdFile(name.into()));
            Ok(())
        } else {
            self.start_local_print(name.into())
        }
    }

    /// Last known SD listing
    pub fn get_sd_files(&self) -> Vec<SdFile> {
        self.shared.sd_files.read().clone()
    }

    /// Ask the firmware for a fresh listing (`M20`)
    pub fn refresh_sd_files(&self) {
        self.send_internal(ConnectionCommand::RefreshSdFiles);
    }

    /// Initialize the SD card (`M21`)
    pub fn init_sd_card(&self) {
        self.send_internal(ConnectionCommand::InitSdCard);
    }

    /// Release the SD card (`M22`)
    pub fn release_sd_card(&self) {
        self.send_internal(ConnectionCommand::ReleaseSdCard);
    }

    /// Delete a file from the card, unless it is selected for printing
    pub fn delete_sd_file(&self, name: impl Into<String>) {
        self.send_internal(ConnectionCommand::DeleteSdFile(name.into()));
    }

    /// Begin a raw SD upload (`M28`); subsequent commands are forwarded
    /// verbatim until [`end_sd_file_transfer`](Self::end_sd_file_transfer)
    pub fn start_sd_file_transfer(&self, name: impl Into<String>) {
        self.send_internal(ConnectionCommand::StartSdFileTransfer(name.into()));
    }

    /// Finish a raw SD upload (`M29`)
    pub fn end_sd_file_transfer(&self) {
        self.send_internal(ConnectionCommand::EndSdFileTransfer);
    }

    /// Replace the temperature offset table
    pub fn set_temperature_offsets(&self, offsets: BTreeMap<HeaterId, f64>) {
        self.send_internal(ConnectionCommand::SetTemperatureOffsets(offsets));
    }

    /// Set the feedrate multiplier in percent
    pub fn set_feedrate_multiplier(&self, percent: f64) {
        self.send_internal(ConnectionCommand::SetFeedrateMultiplier(percent));
    }

    /// Set the flowrate multiplier in percent
    pub fn set_flowrate_multiplier(&self, percent: f64) {
        self.send_internal(ConnectionCommand::SetFlowrateMultiplier(percent));
    }

    /// Provide profile values for script placeholders
    pub fn set_script_context(&self, context: ScriptContext) {
        self.send_internal(ConnectionCommand::SetScriptContext(context));
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Last fatal error, if any
    pub fn error(&self) -> Option<String> {
        self.shared.error.read().clone()
    }

    /// Negotiated baud rate
    pub fn baud_rate(&self) -> u32 {
        *self.shared.baud.read()
    }

    /// Last parsed temperatures
    pub fn temperatures(&self) -> TemperatureRecord {
        self.shared.temperatures.read().clone()
    }

    /// Last parsed position
    pub fn position(&self) -> PositionRecord {
        self.shared.position.read().clone()
    }

    /// Progress of the active print or transfer
    pub fn progress(&self) -> Option<PrintProgress> {
        *self.shared.progress.read()
    }

    /// Firmware info captured during the handshake
    pub fn firmware_info(&self) -> FirmwareInfo {
        self.shared.firmware.read().clone()
    }

    /// Subscribe to the event stream
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PrinterEvent> {
        self.shared.events.subscribe()
    }

    /// Register a listener
    pub fn register_listener(&self, listener: Arc<dyn PrinterListener>) -> PrinterListenerHandle {
        let id = Uuid::new_v4().to_string();
        self.shared.listeners.write().insert(id.clone(), listener);
        PrinterListenerHandle(id)
    }

    /// Unregister a listener
    pub fn unregister_listener(&self, handle: PrinterListenerHandle) {
        self.shared.listeners.write().remove(&handle.0);
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    /// Wait until the state satisfies `predicate`, or time out
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(ConnectionState) -> bool,
        timeout: Duration,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self.state()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn send_internal(&self, command: ConnectionCommand) {
        if let Some(tx) = self.command_tx.read().as_ref() {
            let _ = tx.send(command);
        }
    }
}

/// The IO task body
async fn io_loop(
    mut machine: ProtocolMachine,
    mut commands: mpsc::UnboundedReceiver<ConnectionCommand>,
    shared: Arc<SharedState>,
) {
    machine.begin();

    loop {
        // 1. COMMAND PHASE
        while let Ok(command) = commands.try_recv() {
            machine.handle_command(command);
        }

        // 2. READ PHASE: one line per iteration; the transport read
        // timeout paces the loop
        match machine.transport.readline() {
            Ok(bytes) if !bytes.is_empty() => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                machine.handle_incoming(&text);
            }
            Ok(_) => {}
            Err(e) => machine.fatal(&format!("read failed: {}", e)),
        }

        // 3. TIMER PHASE
        machine.tick();

        // 4. WRITE PHASE
        machine.pump_sends();

        if machine.firmware_dirty {
            *shared.firmware.write() = machine.firmware.clone();
            machine.firmware_dirty = false;
        }
        for event in machine.take_events() {
            apply_event(&shared, &event);
            dispatch_event(&shared, event);
        }

        if machine.done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let _ = machine.transport.close();
}

/// Fold an event into the shared snapshots
fn apply_event(shared: &SharedState, event: &PrinterEvent) {
    match event {
        PrinterEvent::StateChanged { new, .. } => *shared.state.write() = *new,
        PrinterEvent::TemperatureUpdate(temps) => *shared.temperatures.write() = temps.clone(),
        PrinterEvent::PositionUpdate(pos) => *shared.position.write() = pos.clone(),
        PrinterEvent::Progress(progress) => *shared.progress.write() = Some(*progress),
        PrinterEvent::SdFiles(files) => *shared.sd_files.write() = files.clone(),
        PrinterEvent::Error(message) => *shared.error.write() = Some(message.clone()),
        PrinterEvent::Connected { baud, .. } => *shared.baud.write() = *baud,
        _ => {}
    }
}

/// Publish an event and notify listeners. Listener handlers run in their
/// own tasks; a panicking handler never stalls the IO loop.
fn dispatch_event(shared: &SharedState, event: PrinterEvent) {
    shared.events.publish(event.clone());

    let listeners: Vec<Arc<dyn PrinterListener>> =
        shared.listeners.read().values().cloned().collect();
    for listener in listeners {
        let event = event.clone();
        tokio::spawn(async move {
            match &event {
                PrinterEvent::StateChanged { old, new } => {
                    listener.on_state_change(*old, *new).await
                }
                PrinterEvent::Log(line) => listener.on_log(line).await,
                PrinterEvent::TemperatureUpdate(temps) => {
                    listener.on_temperature_update(temps).await
                }
                PrinterEvent::PositionUpdate(pos) => listener.on_position_update(pos).await,
                PrinterEvent::Progress(progress) => listener.on_progress(progress).await,
                PrinterEvent::ZChange(z) => listener.on_z_change(*z).await,
                PrinterEvent::FileSelected { name, size } => {
                    listener.on_file_selected(name, *size).await
                }
                PrinterEvent::SdStateChanged(ready) => listener.on_sd_state_change(*ready).await,
                PrinterEvent::SdFiles(files) => listener.on_sd_files(files).await,
                PrinterEvent::PrintDone => listener.on_print_done().await,
                PrinterEvent::PrintCancelled => listener.on_print_cancelled().await,
                PrinterEvent::PrintFailed(reason) => listener.on_print_failed(reason).await,
                PrinterEvent::Connected { port, baud } => {
                    listener.on_connected(port, *baud).await
                }
                PrinterEvent::Disconnected => listener.on_disconnected().await,
                PrinterEvent::Error(message) => listener.on_error(message).await,
                PrinterEvent::RegisteredMessage { name, formatted } => {
                    listener.on_registered_message(name, formatted).await
                }
            }
        });
    }
}

/// Connection setup phases driven by the IO loop
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnectPhase {
    AwaitingStart,
    Detecting {
        index: usize,
        attempts: u32,
    },
    Handshake,
    Ready,
}

/// The protocol state machine. Owned and mutated exclusively by the IO
/// task.
struct ProtocolMachine {
    config: ConnectionConfig,
    transport: Box<dyn printkit_core::Transport>,
    dialect: ProtocolDialect,
    state: ConnectionState,
    phase: ConnectPhase,

    current_line: u32,
    clear_to_send: bool,
    resend_pending: usize,
    send_record: SendRecord,
    scheduler: CommandScheduler,
    job: PrintJob,
    heaters: HeaterModel,
    temperatures: TemperatureRecord,
    firmware: FirmwareInfo,
    sd: SdCardState,
    feedback: FeedbackMatcher,
    script_context: ScriptContext,

    killed: bool,
    cancelling: bool,
    raw_transfer: bool,
    firmware_dirty: bool,
    error: Option<String>,

    last_rx: Instant,
    last_probe: Instant,
    heartbeat_sent: bool,
    last_temp_poll: Instant,
    last_sd_poll: Instant,
    heatup_since: Option<Instant>,
    heatup_total: Duration,

    events: Vec<PrinterEvent>,
    done: bool,
}

impl ProtocolMachine {
    fn new(config: ConnectionConfig, transport: Box<dyn printkit_core::Transport>) -> Self {
        let now = Instant::now();
        Self {
            dialect: ProtocolDialect::default(),
            state: ConnectionState::Offline,
            phase: ConnectPhase::Ready,
            current_line: 0,
            clear_to_send: true,
            resend_pending: 0,
            send_record: SendRecord::new(config.history_size),
            scheduler: CommandScheduler::new(config.send_now_queue_size),
            job: PrintJob::None,
            heaters: HeaterModel::new(config.g90_influences_extruder),
            temperatures: TemperatureRecord::new(),
            firmware: FirmwareInfo::new(),
            sd: SdCardState::new(),
            feedback: FeedbackMatcher::compile(&config.feedback_controls),
            script_context: ScriptContext::new(),
            killed: false,
            cancelling: false,
            raw_transfer: false,
            firmware_dirty: false,
            error: None,
            last_rx: now,
            last_probe: now,
            heartbeat_sent: false,
            last_temp_poll: now,
            last_sd_poll: now,
            heatup_since: None,
            heatup_total: Duration::ZERO,
            events: Vec::new(),
            done: false,
            transport,
            config,
        }
    }

    fn take_events(&mut self) -> Vec<PrinterEvent> {
        std::mem::take(&mut self.events)
    }

    fn set_state(&mut self, new: ConnectionState) {
        if self.state == new {
            return;
        }
        let old = self.state;
        self.state = new;
        tracing::info!("connection state: {} -> {}", old, new);
        self.events.push(PrinterEvent::StateChanged { old, new });
    }

    fn log(&mut self, line: impl Into<String>) {
        self.events.push(PrinterEvent::Log(line.into()));
    }

    /// Kick off connection setup
    fn begin(&mut self) {
        self.set_state(ConnectionState::OpenSerial);
        if self.config.is_virtual() {
            // The virtual printer answers at any rate
            self.start_handshake();
        } else if self.config.baud == printkit_core::BaudRate::Auto {
            self.set_state(ConnectionState::DetectBaudrate);
            self.phase = ConnectPhase::Detecting {
                index: 0,
                attempts: 0,
            };
            let _ = self.transport.set_baud_rate(BAUDRATE_CANDIDATES[0]);
            self.raw_write("");
            self.last_probe = Instant::now()
                .checked_sub(Duration::from_secs(60))
                .unwrap_or_else(Instant::now);
        } else if self.config.wait_for_start_on_connect {
            self.set_state(ConnectionState::Connecting);
            self.phase = ConnectPhase::AwaitingStart;
        } else {
            self.start_handshake();
        }
    }

    /// Zero line numbers, capture capabilities, prime the temperature
    /// stream
    fn start_handshake(&mut self) {
        self.set_state(ConnectionState::Connecting);
        self.phase = ConnectPhase::Handshake;
        self.clear_to_send = true;
        self.scheduler.push_script(
            ["M110 N0", "M115", "M105"]
                .into_iter()
                .map(String::from),
        );
    }

    /// Write without credit accounting. Used by baud probes and
    /// heartbeats, which are answered out of band. When the configuration
    /// demands checksums on everything, the line is framed and recorded
    /// instead of going out bare.
    fn raw_write(&mut self, line: &str) {
        if !line.is_empty() && self.config.always_send_checksum && self.phase == ConnectPhase::Ready
        {
            self.current_line += 1;
            let framed = codec::frame(line, self.current_line);
            self.send_record.push(self.current_line, line);
            if let Err(e) = self.transport.write_line(framed.as_bytes()) {
                self.fatal(&format!("write failed: {}", e));
            }
            return;
        }
        if let Err(e) = self.transport.write_line(line.as_bytes()) {
            self.fatal(&format!("write failed: {}", e));
        }
    }

    // ----- incoming -----

    fn handle_incoming(&mut self, raw: &str) {
        let text = raw.trim();
        self.last_rx = Instant::now();
        self.heartbeat_sent = false;

        if text.is_empty() {
            // Ignored, except that during a heat-up wait the bare
            // keepalive still proves the firmware is alive (last_rx above)
            return;
        }

        tracing::trace!("recv: {}", text);

        if let ConnectPhase::Detecting { .. } = self.phase {
            self.log(text);
            if text.contains("ok") && text.contains("T:") {
                let baud = self.transport.baud_rate();
                tracing::info!("baud rate detected: {}", baud);
                self.start_handshake();
            }
            return;
        }

        if let Some((name, formatted)) = self.feedback.match_line(text) {
            self.events
                .push(PrinterEvent::RegisteredMessage { name, formatted });
        }

        match lines::classify(text) {
            FirmwareLine::Ok(payload) => {
                let mut has_temps = false;
                if !payload.is_empty() {
                    has_temps = self.apply_temperatures(&payload);
                }
                self.handle_ok(has_temps);
            }
            FirmwareLine::Wait => {
                // Idle beacon; not a response to anything
                tracing::debug!("firmware idle (wait)");
            }
            FirmwareLine::Busy(reason) => {
                if self.config.busy_protocol {
                    tracing::debug!("firmware busy: {}", reason);
                } else {
                    self.log(format!("busy: {}", reason));
                }
            }
            FirmwareLine::Resend(n) => self.handle_resend(n),
            FirmwareLine::Error(message) => self.handle_error_line(&message),
            FirmwareLine::Temperature(raw) => {
                self.apply_temperatures(&raw);
            }
            FirmwareLine::Position(raw) => {
                if let Some(parsed) = position::parse(&raw) {
                    let mut snapshot = PositionRecord::new();
                    snapshot.copy_from(&parsed);
                    self.events.push(PrinterEvent::PositionUpdate(snapshot));
                }
            }
            FirmwareLine::Capability(raw) => {
                if let Some((name, enabled)) = firmware::parse_capability(&raw) {
                    self.firmware.set_capability(name, enabled);
                    self.dialect = ProtocolDialect::from_firmware_info(&self.firmware);
                    self.firmware_dirty = true;
                }
            }
            FirmwareLine::FirmwareInfo(raw) => {
                self.firmware.merge_values(firmware::parse_m115(&raw));
                self.dialect = ProtocolDialect::from_firmware_info(&self.firmware);
                self.firmware_dirty = true;
                self.log(raw);
            }
            FirmwareLine::Start => self.handle_start(),
            FirmwareLine::BeginFileList => self.sd.begin_listing(),
            FirmwareLine::EndFileList => {
                let files = self.sd.end_listing();
                self.events.push(PrinterEvent::SdFiles(files));
            }
            FirmwareLine::SdPrintingByte { pos, total } => {
                if let PrintJob::SdResident(job) = &mut self.job {
                    job.update_progress(pos, total);
                    if let Some(progress) = self.job.progress() {
                        self.events.push(PrinterEvent::Progress(progress));
                    }
                }
            }
            FirmwareLine::NotSdPrinting => {
                tracing::debug!("firmware reports no SD print running");
            }
            FirmwareLine::SdCardStatus(ready) => {
                if self.sd.set_ready(ready) {
                    self.events.push(PrinterEvent::SdStateChanged(ready));
                }
            }
            FirmwareLine::FileOpened { name, size } => {
                self.sd.set_selected(&name, size);
                self.events.push(PrinterEvent::FileSelected { name, size });
            }
            FirmwareLine::FileSelected => {}
            FirmwareLine::WritingToFile(_) => {
                self.set_state(ConnectionState::TransferringFile);
            }
            FirmwareLine::DoneSavingFile => {
                self.log("Done saving file");
            }
            FirmwareLine::DonePrintingFile => {
                if matches!(self.job, PrintJob::SdResident(_)) {
                    self.finish_print();
                }
            }
            FirmwareLine::OpenFailed(name) => {
                self.log(format!("SD error: open failed for {}", name));
            }
            FirmwareLine::Echo(message) => {
                if let Some(command) = message.strip_prefix("Unknown command:") {
                    self.log(format!("firmware rejected command:{}", command));
                } else {
                    self.log(format!("echo:{}", message));
                }
            }
            FirmwareLine::Message(message) => {
                if self.sd.listing_in_progress() {
                    if let Some(entry) = sd_parser::parse_file_entry(&message) {
                        self.sd.add_entry(entry);
                    }
                } else {
                    self.log(message);
                }
            }
        }
    }

    /// Parse and fold in a temperature report; returns whether any
    /// readings were found
    fn apply_temperatures(&mut self, raw: &str) -> bool {
        let parsed = temperature::parse(raw);
        if parsed.is_empty() {
            return false;
        }
        let canonical = temperature::canonicalize(&parsed, self.heaters.current_tool());
        let had_readings = !canonical.is_empty();
        self.temperatures.merge(canonical);
        for (heater, target) in &parsed.target_overrides {
            if let Some(reading) = self.temperatures.get(heater).copied() {
                self.temperatures.set(
                    heater.clone(),
                    printkit_core::TemperatureReading::new(reading.actual, Some(*target)),
                );
            }
        }
        if had_readings {
            self.events
                .push(PrinterEvent::TemperatureUpdate(self.temperatures.clone()));
        }
        had_readings
    }

    fn handle_ok(&mut self, has_temps: bool) {
        if self.killed {
            return;
        }

        if let Some(since) = self.heatup_since {
            if has_temps {
                // Response to an out-of-band probe; the heat-and-wait
                // command is still running
                return;
            }
            // Time spent waiting for heat does not count as print time
            self.heatup_total += since.elapsed();
            self.heatup_since = None;
        }

        self.clear_to_send = true;

        if self.cancelling && self.scheduler.is_empty() {
            self.cancelling = false;
            self.set_state(ConnectionState::Operational);
            self.events.push(PrinterEvent::PrintCancelled);
        }

        if self.phase == ConnectPhase::Handshake
            && self.resend_pending == 0
            && self.scheduler.is_empty()
        {
            self.complete_handshake();
        }
    }

    fn complete_handshake(&mut self) {
        self.phase = ConnectPhase::Ready;
        self.set_state(ConnectionState::Operational);
        let port = self.transport.port_name().to_string();
        let baud = self.transport.baud_rate();
        self.events.push(PrinterEvent::Connected { port, baud });

        if self.dialect.autoreport_temp && self.config.enable_autoreport {
            let secs = (self.config.temperature_poll_interval_ms / 1000).max(1);
            self.scheduler.push_script([format!("M155 S{}", secs)]);
        }
        self.run_script(ScriptEvent::Connect);
    }

    fn handle_start(&mut self) {
        match self.phase {
            ConnectPhase::AwaitingStart => self.start_handshake(),
            ConnectPhase::Handshake | ConnectPhase::Detecting { .. } => {}
            ConnectPhase::Ready => {
                // External reset while connected: the firmware lost all
                // protocol state
                tracing::warn!("printer sent 'start' while connected; external reset?");
                self.log("printer reset detected");
                if self.job.is_active() {
                    self.fail_print("printer reset during print");
                }
                self.scheduler.clear();
                self.send_record.clear();
                self.resend_pending = 0;
                self.clear_to_send = true;
                self.heatup_since = None;
                self.scheduler
                    .push_script(["M110 N0".to_string(), "M105".to_string()]);
            }
        }
    }

    fn handle_resend(&mut self, n: u32) {
        if !self.dialect.ok_after_resend {
            // Broken-resend dialects ack the request itself
            self.clear_to_send = true;
        }

        if n > self.current_line {
            self.log(format!(
                "ignoring resend request for future line {} (current {})",
                n, self.current_line
            ));
            return;
        }

        let delta = (self.current_line - n + 1) as usize;
        if self.send_record.is_empty() || delta > self.send_record.len() {
            let oldest = self.send_record.oldest_n().unwrap_or(self.current_line);
            self.fail_print("resend request beyond history");
            self.fatal(&format!(
                "desync: firmware requested line {} but history reaches back to {}",
                n, oldest
            ));
            return;
        }

        tracing::info!("resend requested for line {} ({} lines)", n, delta);
        self.resend_pending = delta;
    }

    fn handle_error_line(&mut self, message: &str) {
        let lower = message.to_ascii_lowercase();

        // Communication errors recovered via resend
        if lower.contains("checksum")
            || lower.contains("line number")
            || lower.contains("lineno")
            || lower.contains("expected line")
            || lower.contains("format error")
        {
            tracing::debug!("recoverable communication error: {}", message);
            return;
        }

        // SD errors: surfaced, never fatal
        if lower.contains("sd ")
            || lower.starts_with("sd")
            || lower.contains("volume.init")
            || lower.contains("open failed")
            || lower.contains("card")
        {
            self.log(format!("SD error: {}", message));
            return;
        }

        if lower.contains("unknown command") {
            self.log(format!("firmware error: {}", message));
            return;
        }

        if self.config.disconnect_on_errors {
            self.fail_print(message);
            self.fatal(message);
        } else if self.config.ignore_errors {
            tracing::warn!("ignoring firmware error: {}", message);
            self.log(format!("ignored error: {}", message));
        } else {
            self.fail_print(message);
            self.clear_to_send = true;
        }
    }

    // ----- timers -----

    fn tick(&mut self) {
        if self.done || self.killed {
            return;
        }
        let now = Instant::now();

        if let ConnectPhase::Detecting { index, attempts } = self.phase {
            if now.duration_since(self.last_probe) >= Duration::from_secs(1) {
                if attempts >= 5 {
                    let next = index + 1;
                    if next >= BAUDRATE_CANDIDATES.len() {
                        self.fatal("baud rate detection failed");
                        return;
                    }
                    tracing::info!("trying baud rate {}", BAUDRATE_CANDIDATES[next]);
                    if let Err(e) = self.transport.set_baud_rate(BAUDRATE_CANDIDATES[next]) {
                        self.fatal(&format!("baud switch failed: {}", e));
                        return;
                    }
                    self.phase = ConnectPhase::Detecting {
                        index: next,
                        attempts: 1,
                    };
                    self.raw_write("");
                    self.raw_write("M105");
                } else {
                    self.phase = ConnectPhase::Detecting {
                        index,
                        attempts: attempts + 1,
                    };
                    self.raw_write("M105");
                }
                self.last_probe = now;
            }
            return;
        }

        let timeout = Duration::from_millis(self.config.communication_timeout_ms);
        let idle = now.duration_since(self.last_rx);

        if self.phase == ConnectPhase::AwaitingStart && idle > timeout * 2 {
            tracing::warn!("no start line received; proceeding with handshake");
            self.start_handshake();
            return;
        }

        if self.phase == ConnectPhase::Handshake && idle > timeout * 2 {
            tracing::warn!("handshake stalled; retrying");
            self.clear_to_send = true;
            self.last_rx = now;
            if self.scheduler.is_empty() {
                self.scheduler.push_script(["M105".to_string()]);
            }
            return;
        }

        if !self.state.accepts_commands() {
            return;
        }

        // While a file streams to the card, anything extra we inject
        // would land in the file
        if self.state == ConnectionState::TransferringFile {
            return;
        }

        // Heartbeat: quiet line, then escalation at twice the window
        if idle > timeout && !self.heartbeat_sent {
            tracing::debug!("communication quiet for {:?}; probing", idle);
            self.raw_write("M105");
            self.heartbeat_sent = true;
        } else if idle > timeout * 2 {
            tracing::warn!("no response to heartbeat; forcing send credit");
            if !self.clear_to_send && self.resend_pending == 0 && !self.send_record.is_empty() {
                // Re-send the newest line in case it was lost
                self.resend_pending = 1;
            }
            self.clear_to_send = true;
            self.heartbeat_sent = false;
            self.last_rx = now;
        }

        // Temperature poll
        let autoreport = self.dialect.autoreport_temp && self.config.enable_autoreport;
        let temp_interval = Duration::from_millis(self.config.temperature_poll_interval_ms);
        if !autoreport && now.duration_since(self.last_temp_poll) >= temp_interval {
            self.last_temp_poll = now;
            if self.heatup_since.is_some() {
                self.raw_write("M105");
            } else {
                self.scheduler.enqueue_probe("M105");
            }
        }

        // SD status poll during an SD-resident print
        if matches!(self.job, PrintJob::SdResident(_))
            && self.state == ConnectionState::Printing
            && !self.dialect.autoreport_sd_status
        {
            let sd_interval = Duration::from_millis(self.config.sd_poll_interval_ms);
            if now.duration_since(self.last_sd_poll) >= sd_interval {
                self.last_sd_poll = now;
                self.scheduler.enqueue_probe("M27");
            }
        }
    }

    // ----- outgoing -----

    fn pump_sends(&mut self) {
        loop {
            if self.done || self.killed || !self.clear_to_send {
                return;
            }

            // 1. Resend replays take absolute priority
            if self.resend_pending > 0 {
                let Some(entry) = self.send_record.from_end(self.resend_pending) else {
                    self.fatal("resend bookkeeping out of range");
                    return;
                };
                let framed = codec::frame(&entry.text, entry.n);
                let n = entry.n;
                tracing::debug!("replaying line {}", n);
                if let Err(e) = self.transport.write_line(framed.as_bytes()) {
                    self.fatal(&format!("write failed: {}", e));
                    return;
                }
                self.resend_pending -= 1;
                if self.dialect.ok_after_resend {
                    self.clear_to_send = false;
                    return;
                }
                continue;
            }

            // Heat-up wait: only probes go out until the blocking ok
            if self.heatup_since.is_some() {
                return;
            }

            // 2./3. Send-now, then scripts
            if let Some((command, source)) = self.scheduler.pop() {
                // During a raw upload the user's send-now lines ARE the
                // payload; script-queue lines (M28/M29) stay framed
                let verbatim = self.state == ConnectionState::TransferringFile
                    && self.raw_transfer
                    && source == crate::protocol::ScheduledSource::SendNow;
                self.transmit(&command, verbatim);
                return;
            }

            // 4. The job, only when everything above is drained
            if self.state == ConnectionState::Printing
                || (self.state == ConnectionState::TransferringFile && self.job.is_active())
            {
                match self.job.next_line() {
                    Ok(Some(line)) => {
                        let verbatim = self.state == ConnectionState::TransferringFile
                            && matches!(self.job, PrintJob::SdUpload(_));
                        self.transmit(&line, verbatim);
                        if let Some(mut progress) = self.job.progress() {
                            let heatup_secs = self.heatup_total.as_secs();
                            progress.elapsed_secs =
                                progress.elapsed_secs.map(|s| s.saturating_sub(heatup_secs));
                            self.events.push(PrinterEvent::Progress(progress));
                        }
                    }
                    Ok(None) => {
                        if self.job.is_host_streamed() {
                            self.finish_print();
                        }
                        return;
                    }
                    Err(e) => {
                        self.fail_print(&format!("job source failed: {}", e));
                        return;
                    }
                }
            }
            return;
        }
    }

    /// Frame and write one command, consuming the send credit. `verbatim`
    /// skips framing entirely (streaming-upload payload).
    fn transmit(&mut self, command: &str, verbatim: bool) {
        if verbatim {
            if let Err(e) = self.transport.write_line(command.as_bytes()) {
                self.fatal(&format!("write failed: {}", e));
                return;
            }
            self.clear_to_send = false;
            return;
        }

        let effects = self.heaters.process_outgoing(command);
        let mut line = effects.line;

        // Tool change scripts wrap the T command; re-queue the expansion
        // (the model already switched tools, so this runs once)
        if effects.tool_change.is_some() {
            let before = self.render_script(ScriptEvent::ToolChangeBefore);
            let after = self.render_script(ScriptEvent::ToolChangeAfter);
            if !before.is_empty() || !after.is_empty() {
                let mut sequence = before;
                sequence.push(line);
                sequence.extend(after);
                self.scheduler.push_script(sequence);
                return;
            }
        }

        if self.config.uppercase_outgoing {
            line = codec::uppercase_command(&line, &self.config.uppercase_blacklist);
        }

        if let Some(z) = effects.z_change {
            self.events.push(PrinterEvent::ZChange(z));
        }
        if effects.starts_heatup {
            self.heatup_since = Some(Instant::now());
        }

        // M110: the argument is the line number of the reset itself
        if let Some(n) = effects.line_number_reset {
            let framed = codec::frame(&line, n);
            if let Err(e) = self.transport.write_line(framed.as_bytes()) {
                self.fatal(&format!("write failed: {}", e));
                return;
            }
            self.current_line = n;
            self.send_record.clear();
            self.clear_to_send = false;
            return;
        }

        self.current_line += 1;
        let framed = codec::frame(&line, self.current_line);
        tracing::trace!("send: {}", framed);
        if let Err(e) = self.transport.write_line(framed.as_bytes()) {
            self.fatal(&format!("write failed: {}", e));
            return;
        }
        self.send_record.push(self.current_line, line);
        self.clear_to_send = false;
    }

    // ----- commands from the handle -----

    fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Send(text) => self.user_send(text),
            ConnectionCommand::StartPrint(job) => self.start_job(job),
            ConnectionCommand::StartSdPrint => {
                let selected = self.sd.selected().map(|(name, size)| (name.to_string(), size));
                match selected {
                    Some((name, size)) => {
                        let job = PrintJob::SdResident(SdResidentPrintJob::new(name, size));
                        self.start_job(job);
                    }
                    None => self.log("no SD file selected"),
                }
            }
            ConnectionCommand::CancelPrint => self.cancel_print(),
            ConnectionCommand::SetPause(paused) => self.set_pause(paused),
            ConnectionCommand::StartFileTransfer { local, remote } => {
                match SdStreamingUploadJob::open(&local, remote) {
                    Ok(job) => self.start_job(PrintJob::SdUpload(job)),
                    Err(e) => self.log(format!("file transfer failed: {}", e)),
                }
            }
            ConnectionCommand::SelectSdFile(name) => {
                self.scheduler.push_script([format!("M23 {}", name)]);
            }
            ConnectionCommand::RefreshSdFiles => {
                self.scheduler.enqueue_probe("M20");
            }
            ConnectionCommand::InitSdCard => {
                self.scheduler.enqueue_probe("M21");
            }
            ConnectionCommand::ReleaseSdCard => {
                self.scheduler.enqueue_probe("M22");
                if self.sd.set_ready(false) {
                    self.events.push(PrinterEvent::SdStateChanged(false));
                }
            }
            ConnectionCommand::DeleteSdFile(name) => {
                if self.sd.is_selected(&name) {
                    self.log(format!(
                        "refusing to delete {}: selected for printing",
                        name
                    ));
                } else {
                    self.scheduler.push_script([format!("M30 {}", name)]);
                }
            }
            ConnectionCommand::StartSdFileTransfer(name) => {
                self.raw_transfer = true;
                self.scheduler.push_script([format!("M28 {}", name)]);
                self.set_state(ConnectionState::TransferringFile);
            }
            ConnectionCommand::EndSdFileTransfer => {
                self.scheduler.push_script(["M29".to_string()]);
                self.raw_transfer = false;
                self.set_state(ConnectionState::Operational);
            }
            ConnectionCommand::SetTemperatureOffsets(offsets) => {
                self.heaters.set_offsets(offsets);
            }
            ConnectionCommand::SetFeedrateMultiplier(percent) => {
                self.heaters.set_feedrate_multiplier(percent);
            }
            ConnectionCommand::SetFlowrateMultiplier(percent) => {
                self.heaters.set_flowrate_multiplier(percent);
                self.scheduler
                    .push_script([format!("M221 S{}", percent as i64)]);
            }
            ConnectionCommand::SetScriptContext(context) => {
                self.script_context = context;
            }
            ConnectionCommand::Disconnect => self.shutdown(),
        }
    }

    fn user_send(&mut self, text: String) {
        if self.killed {
            self.log("connection killed; command dropped");
            return;
        }

        if self.config.support_m112 && text.contains("M112") {
            self.emergency_stop();
            return;
        }

        if self.raw_transfer {
            // Upload payload goes to the card untouched
            if let Some(dropped) = self.scheduler.enqueue(text.trim_end()) {
                self.log(format!("send queue overflow, dropped: {}", dropped));
            }
            return;
        }

        let stripped = codec::strip_comment(&text);
        let stripped = stripped.trim();
        if stripped.is_empty() {
            return;
        }

        if let Some(dropped) = self.scheduler.enqueue(stripped) {
            tracing::warn!("send queue full; dropping oldest command: {}", dropped);
            self.log(format!("send queue overflow, dropped: {}", dropped));
        }
    }

    /// `M112`: out of band, past the credit gate
    fn emergency_stop(&mut self) {
        tracing::warn!("emergency stop (M112)");
        self.current_line += 1;
        let framed = codec::frame("M112", self.current_line);
        let _ = self.transport.write_line(framed.as_bytes());
        self.killed = true;
        self.job.cancel();
        self.scheduler.clear();
        self.error = Some("emergency stop (M112)".to_string());
        self.events
            .push(PrinterEvent::Error("emergency stop (M112)".to_string()));
        self.set_state(ConnectionState::Error);
        let _ = self.transport.close();
        self.events.push(PrinterEvent::Disconnected);
        self.done = true;
    }

    fn start_job(&mut self, job: PrintJob) {
        if self.job.is_active() {
            self.log("a print job is already active");
            return;
        }
        self.heatup_total = Duration::ZERO;
        let starts = job.start_commands();
        match &job {
            PrintJob::Local(_) => {
                self.set_state(ConnectionState::Printing);
                self.run_script(ScriptEvent::PrintStart);
            }
            PrintJob::SdResident(_) => {
                self.set_state(ConnectionState::Printing);
                self.run_script(ScriptEvent::PrintStart);
                self.scheduler.push_script(starts);
                self.last_sd_poll = Instant::now();
            }
            PrintJob::SdUpload(_) => {
                self.set_state(ConnectionState::TransferringFile);
                self.scheduler.push_script(starts);
            }
            PrintJob::None => return,
        }
        self.job = job;
    }

    fn cancel_print(&mut self) {
        if !self.job.is_active() && self.state != ConnectionState::TransferringFile {
            return;
        }
        self.set_state(ConnectionState::Cancelling);
        let was_sd = matches!(self.job, PrintJob::SdResident(_));
        let was_upload = matches!(self.job, PrintJob::SdUpload(_));
        self.job.cancel();
        self.scheduler.clear();
        self.heatup_since = None;

        if was_sd {
            self.scheduler
                .push_script(["M25".to_string(), "M26 S0".to_string()]);
        }
        if was_upload {
            self.scheduler.push_script(["M29".to_string()]);
        }
        let script = self.render_script(ScriptEvent::PrintCancel);
        self.scheduler.push_script(script);
        self.cancelling = true;

        if self.scheduler.is_empty() {
            // Nothing to drain
            self.cancelling = false;
            self.set_state(ConnectionState::Operational);
            self.events.push(PrinterEvent::PrintCancelled);
        }
    }

    fn set_pause(&mut self, paused: bool) {
        match (paused, self.state) {
            (true, ConnectionState::Printing) => {
                self.set_state(ConnectionState::Paused);
                if matches!(self.job, PrintJob::SdResident(_)) {
                    self.scheduler.push_script(["M25".to_string()]);
                }
                self.run_script(ScriptEvent::PrintPause);
            }
            (false, ConnectionState::Paused) => {
                self.run_script(ScriptEvent::PrintResume);
                if matches!(self.job, PrintJob::SdResident(_)) {
                    self.scheduler.push_script(["M24".to_string()]);
                }
                self.set_state(ConnectionState::Printing);
            }
            _ => {}
        }
    }

    fn finish_print(&mut self) {
        let was_upload = matches!(self.job, PrintJob::SdUpload(_));
        if was_upload {
            // M29 must precede the listing refresh, so both go through
            // the ordered script queue
            self.scheduler
                .push_script(["M29".to_string(), "M20".to_string()]);
            self.job.cancel();
            self.set_state(ConnectionState::Operational);
            self.log("SD upload complete");
            return;
        }

        self.events.push(PrinterEvent::Progress(PrintProgress {
            completion: Some(1.0),
            file_pos: self.job.file_pos(),
            file_size: self.job.size(),
            elapsed_secs: None,
        }));
        self.job.cancel();
        self.run_script(ScriptEvent::PrintDone);
        self.set_state(ConnectionState::Operational);
        self.events.push(PrinterEvent::PrintDone);
    }

    fn fail_print(&mut self, reason: &str) {
        if !self.job.is_active() {
            return;
        }
        self.job.cancel();
        self.heatup_since = None;
        self.events
            .push(PrinterEvent::PrintFailed(reason.to_string()));
        if !self.state.is_error() && !self.done {
            self.set_state(ConnectionState::Operational);
        }
    }

    fn run_script(&mut self, event: ScriptEvent) {
        let lines = self.render_script(event);
        self.scheduler.push_script(lines);
    }

    fn render_script(&self, event: ScriptEvent) -> Vec<String> {
        match self.config.scripts.get(event) {
            Some(script) => scripts::render(script, &self.script_context),
            None => Vec::new(),
        }
    }

    /// Fatal error: tear down the connection
    fn fatal(&mut self, message: &str) {
        if self.done {
            return;
        }
        tracing::error!("{}", message);
        self.error = Some(message.to_string());
        self.job.cancel();
        self.scheduler.clear();
        self.events.push(PrinterEvent::Error(message.to_string()));
        self.set_state(ConnectionState::Error);
        let _ = self.transport.close();
        self.set_state(ConnectionState::ClosedWithError);
        self.events.push(PrinterEvent::Disconnected);
        self.done = true;
    }

    /// Clean shutdown requested by the handle
    fn shutdown(&mut self) {
        if self.done {
            return;
        }
        // The disconnect script is best-effort: written straight out, not
        // waiting for acks
        let lines = self.render_script(ScriptEvent::Disconnect);
        for line in lines {
            self.current_line += 1;
            let framed = codec::frame(&line, self.current_line);
            let _ = self.transport.write_line(framed.as_bytes());
        }
        self.job.cancel();
        self.scheduler.clear();
        self.set_state(ConnectionState::Closed);
        self.events.push(PrinterEvent::Disconnected);
        self.done = true;
    }
}
