//! SCPI over TCP
//!
//! Instruments are described by static command tables: each operation maps to
//! a short sequence of writes and queries. `{0}`, `{1}`... in a template are
//! replaced by the call's arguments.

use super::instruments::{parse_statistics, WavelengthRange};
use super::{Device, DeviceError, Driver};
use crate::core::CapabilityDescriptor;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub use super::instruments::{InstrumentModel, AGILENT_DSO7000A, BUILTIN_MODELS, SANTEC_TSL_210H, XILINX_VCU108};

/// Port used when an address does not name one
pub const DEFAULT_PORT: u16 = 5025;

/// Default I/O timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// How long a multi-line reply may pause before it is considered complete
const QUIET_PERIOD: Duration = Duration::from_millis(50);

/// One exchange with the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Write(&'static str),
    /// Send and read one reply line
    Query(&'static str),
    /// Send and read reply lines until the instrument goes quiet
    Drain(&'static str),
    /// Send and read reply lines until one contains the marker
    Until(&'static str, &'static str),
    /// Handled by the device itself
    Tune(Tuning),
}

/// Wavelength operations that need the device's own bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tuning {
    SetWavelength,
    MinWavelength,
    MaxWavelength,
    SweepSetup,
    StartSweep,
    SweepStep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    /// `Label(n),v1,v2,...` lists turned into a JSON object
    Statistics,
}

pub type Validator = fn(&[String]) -> Result<(), String>;

fn accept_any(_: &[String]) -> Result<(), String> {
    Ok(())
}

/// One operation of an instrument
pub struct CommandSpec {
    operation: &'static str,
    parameters: &'static [&'static str],
    steps: &'static [Step],
    /// Used when called without arguments
    bare: Option<&'static [Step]>,
    format: Format,
    validate: Validator,
}

pub const fn command(
    operation: &'static str,
    parameters: &'static [&'static str],
    steps: &'static [Step],
) -> CommandSpec {
    CommandSpec {
        operation,
        parameters,
        steps,
        bare: None,
        format: Format::Text,
        validate: accept_any,
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("operation", &self.operation)
            .field("parameters", &self.parameters)
            .field("steps", &self.steps)
            .field("bare", &self.bare)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    /// Steps to run when every argument is omitted
    pub const fn or_bare(self, bare: &'static [Step]) -> Self {
        CommandSpec {
            bare: Some(bare),
            ..self
        }
    }

    pub const fn statistics(self) -> Self {
        CommandSpec {
            format: Format::Statistics,
            ..self
        }
    }

    pub const fn validated(self, validate: Validator) -> Self {
        CommandSpec { validate, ..self }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn parameters(&self) -> &'static [&'static str] {
        self.parameters
    }

    fn steps_for(&self, args: &[String]) -> Result<&'static [Step], DeviceError> {
        if args.is_empty() {
            if let Some(bare) = self.bare {
                return Ok(bare);
            }
        }
        if args.len() != self.parameters.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "{} takes ({}), got {} arguments",
                self.operation,
                self.parameters.join(", "),
                args.len()
            )));
        }
        (self.validate)(args).map_err(DeviceError::InvalidArgument)?;
        Ok(self.steps)
    }

    /// Commands sent for `args`, without talking to an instrument
    pub fn render(&self, args: &[String]) -> Result<Vec<String>, DeviceError> {
        Ok(self
            .steps_for(args)?
            .iter()
            .filter_map(|step| step.template().map(|template| render(template, args)))
            .collect())
    }
}

impl Step {
    fn template(&self) -> Option<&'static str> {
        match *self {
            Step::Write(template) | Step::Query(template) | Step::Drain(template) => Some(template),
            Step::Until(template, _) => Some(template),
            Step::Tune(_) => None,
        }
    }
}

/// Substitute `{n}` placeholders in one pass; argument text is never rescanned
fn render(template: &str, args: &[String]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let placeholder = after.find('}').and_then(|close| {
            let index: usize = after[..close].parse().ok()?;
            Some((args.get(index)?, close))
        });
        match placeholder {
            Some((arg, close)) => {
                rendered.push_str(arg.trim());
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Normalize `host:port`, `host`, `TCPIP0::host::port::SOCKET` or
/// `TCPIP0::host::INSTR` to `host:port`
pub fn parse_address(address: &str) -> Result<String, DeviceError> {
    let address = address.trim();
    let invalid = || DeviceError::InvalidArgument(format!("unsupported address '{}'", address));

    if address.to_ascii_uppercase().starts_with("TCPIP") {
        let parts: Vec<&str> = address.split("::").collect();
        return match parts.as_slice() {
            [_, host, port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                let port: u16 = port.parse().map_err(|_| invalid())?;
                Ok(format!("{}:{}", host, port))
            }
            [_, host, suffix] if suffix.eq_ignore_ascii_case("INSTR") => {
                Ok(format!("{}:{}", host, DEFAULT_PORT))
            }
            _ => Err(invalid()),
        };
    }

    if address.is_empty() || address.contains("::") {
        return Err(invalid());
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port: u16 = port.parse().map_err(|_| invalid())?;
            Ok(format!("{}:{}", host, port))
        }
        Some(_) => Err(invalid()),
        None => Ok(format!("{}:{}", address, DEFAULT_PORT)),
    }
}

/// Driver for one SCPI instrument model
#[derive(Debug, Clone)]
pub struct ScpiDriver {
    model: &'static InstrumentModel,
    timeout: Duration,
}

impl ScpiDriver {
    pub fn new(model: &'static InstrumentModel) -> Self {
        Self {
            model,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Driver for ScpiDriver {
    fn driver_type(&self) -> &str {
        self.model.driver_type
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        self.model.capabilities()
    }

    async fn open(&self, device: &str, address: &str) -> Result<Arc<dyn Device>, DeviceError> {
        let target = parse_address(address)?;
        let stream = bounded(self.timeout, TcpStream::connect(&target)).await??;
        stream.set_nodelay(true)?;

        info!("Connected to {} ({}) at {}", device, self.model.driver_type, target);

        Ok(Arc::new(ScpiDevice {
            name: device.to_string(),
            model: self.model,
            stream: Mutex::new(Some(BufReader::new(stream))),
            sweep: Mutex::new(Sweep::default()),
            timeout: self.timeout,
        }))
    }
}

async fn bounded<F: Future>(limit: Duration, future: F) -> Result<F::Output, DeviceError> {
    timeout(limit, future)
        .await
        .map_err(|_| DeviceError::Timeout(limit.as_millis() as u64))
}

#[derive(Debug, Clone, Copy)]
enum Receive {
    Line,
    Quiet,
    Marker(&'static str),
}

#[derive(Debug, Clone, Copy)]
struct SweepPlan {
    start: f64,
    end: f64,
    step: f64,
}

#[derive(Debug, Default)]
struct Sweep {
    plan: Option<SweepPlan>,
    wavelength: Option<f64>,
}

struct ScpiDevice {
    name: String,
    model: &'static InstrumentModel,
    stream: Mutex<Option<BufReader<TcpStream>>>,
    sweep: Mutex<Sweep>,
    timeout: Duration,
}

impl ScpiDevice {
    async fn send(stream: &mut BufReader<TcpStream>, command: &str, limit: Duration) -> Result<(), DeviceError> {
        let line = format!("{}\n", command);
        bounded(limit, stream.get_mut().write_all(line.as_bytes())).await??;
        bounded(limit, stream.get_mut().flush()).await??;
        Ok(())
    }

    async fn read_line(stream: &mut BufReader<TcpStream>, limit: Duration) -> Result<String, DeviceError> {
        let mut line = String::new();
        match bounded(limit, stream.read_line(&mut line)).await?? {
            0 => Err(DeviceError::Disconnected),
            _ => Ok(line.trim().to_string()),
        }
    }

    async fn receive(
        stream: &mut BufReader<TcpStream>,
        until: Receive,
        limit: Duration,
    ) -> Result<String, DeviceError> {
        let mut lines = vec![Self::read_line(stream, limit).await?];
        loop {
            let more = match until {
                Receive::Line => false,
                Receive::Marker(marker) => lines.last().map_or(true, |line| !line.contains(marker)),
                Receive::Quiet => match timeout(QUIET_PERIOD, stream.fill_buf()).await {
                    Ok(Ok(buffered)) => !buffered.is_empty(),
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => false,
                },
            };
            if !more {
                return Ok(lines.join("\n"));
            }
            lines.push(Self::read_line(stream, limit).await?);
        }
    }

    /// Send a command and read its reply under one lock
    async fn exchange(&self, command: &str, until: Receive) -> Result<String, DeviceError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(DeviceError::Disconnected)?;
        debug!("SCPI query {}: {:?}", self.name, command);
        Self::send(stream, command, self.timeout).await?;

        match Self::receive(stream, until, self.timeout).await {
            Ok(response) => {
                debug!("SCPI response {}: {:?}", self.name, response);
                Ok(response)
            }
            Err(e) => {
                // a reply arriving later would be read as the answer to the next query
                warn!("Dropping connection to {} after failed read: {}", self.name, e);
                guard.take();
                Err(e)
            }
        }
    }

    async fn perform(&self, step: Step, args: &[String]) -> Result<Option<String>, DeviceError> {
        match step {
            Step::Write(template) => self.write(&render(template, args)).await.map(|_| None),
            Step::Query(template) => self.exchange(&render(template, args), Receive::Line).await.map(Some),
            Step::Drain(template) => self.exchange(&render(template, args), Receive::Quiet).await.map(Some),
            Step::Until(template, marker) => self
                .exchange(&render(template, args), Receive::Marker(marker))
                .await
                .map(Some),
            Step::Tune(tuning) => self.tune(tuning, args).await,
        }
    }

    async fn tune(&self, tuning: Tuning, args: &[String]) -> Result<Option<String>, DeviceError> {
        let range = self
            .model
            .wavelength_range
            .ok_or_else(|| DeviceError::Unsupported(format!("{:?} on {}", tuning, self.name)))?;

        match tuning {
            Tuning::MinWavelength => Ok(Some(range.min.to_string())),
            Tuning::MaxWavelength => Ok(Some(range.max.to_string())),
            Tuning::SetWavelength => {
                self.set_wavelength(range, number(args, 0)?).await?;
                Ok(None)
            }
            Tuning::SweepSetup => {
                let plan = SweepPlan {
                    start: number(args, 0)?,
                    end: number(args, 1)?,
                    step: number(args, 2)?,
                };
                range.check(plan.start)?;
                range.check(plan.end)?;
                if plan.step <= 0.0 || plan.end < plan.start {
                    return Err(DeviceError::InvalidArgument(format!(
                        "sweep {} to {} by {} never advances",
                        plan.start, plan.end, plan.step
                    )));
                }
                self.sweep.lock().await.plan = Some(plan);
                Ok(None)
            }
            Tuning::StartSweep => {
                let plan = self.sweep_plan().await?;
                self.set_wavelength(range, plan.start).await.map(Some)
            }
            Tuning::SweepStep => {
                let plan = self.sweep_plan().await?;
                let current = self.sweep.lock().await.wavelength;
                match current {
                    Some(wavelength) if wavelength >= plan.start && wavelength < plan.end => {
                        let next = (wavelength + plan.step).min(plan.end);
                        self.set_wavelength(range, next).await.map(Some)
                    }
                    Some(wavelength) => Ok(Some(format!("{:.3}", wavelength))),
                    None => Err(DeviceError::InvalidArgument("sweep not started".to_string())),
                }
            }
        }
    }

    async fn sweep_plan(&self) -> Result<SweepPlan, DeviceError> {
        self.sweep
            .lock()
            .await
            .plan
            .ok_or_else(|| DeviceError::InvalidArgument("sweep not configured".to_string()))
    }

    async fn set_wavelength(&self, range: WavelengthRange, wavelength: f64) -> Result<String, DeviceError> {
        range.check(wavelength)?;
        let formatted = format!("{:.3}", wavelength);
        self.write(&format!("WA{}", formatted)).await?;
        self.sweep.lock().await.wavelength = Some(wavelength);
        Ok(formatted)
    }
}

fn number(args: &[String], index: usize) -> Result<f64, DeviceError> {
    let arg = args.get(index).map(|a| a.trim()).unwrap_or_default();
    arg.parse()
        .map_err(|_| DeviceError::InvalidArgument(format!("'{}' is not a number", arg)))
}

#[async_trait]
impl Device for ScpiDevice {
    fn identity(&self) -> &str {
        &self.name
    }

    async fn write(&self, command: &str) -> Result<(), DeviceError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(DeviceError::Disconnected)?;
        debug!("SCPI write {}: {:?}", self.name, command);
        Self::send(stream, command, self.timeout).await
    }

    async fn query(&self, command: &str) -> Result<String, DeviceError> {
        self.exchange(command, Receive::Line).await
    }

    async fn invoke(&self, operation: &str, args: &[String]) -> Result<Option<String>, DeviceError> {
        let command = self
            .model
            .command(operation)
            .ok_or_else(|| DeviceError::Unsupported(operation.to_string()))?;

        let mut replies = Vec::new();
        for step in command.steps_for(args)? {
            if let Some(reply) = self.perform(*step, args).await? {
                replies.push(reply);
            }
        }
        if replies.is_empty() {
            return Ok(None);
        }

        let reply = replies.concat();
        match command.format {
            Format::Text => Ok(Some(reply)),
            Format::Statistics => parse_statistics(&reply).map(Some),
        }
    }

    async fn is_alive(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let stream = self.stream.lock().await.take();
        match stream {
            Some(mut stream) => {
                let _ = bounded(self.timeout, stream.get_mut().shutdown()).await;
                debug!("Closed connection to {}", self.name);
                Ok(())
            }
            None => Err(DeviceError::Disconnected),
        }
    }
}
