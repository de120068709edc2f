//! Command tables of the built-in instrument models

use super::scpi::{command, CommandSpec, Step, Tuning};
use super::DeviceError;
use crate::core::CapabilityDescriptor;

use Step::{Drain, Query, Tune, Until, Write};

/// Static description of one instrument model
#[derive(Debug)]
pub struct InstrumentModel {
    pub driver_type: &'static str,
    commands: &'static [CommandSpec],
    pub wavelength_range: Option<WavelengthRange>,
}

/// Tunable range of a laser source in nm
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavelengthRange {
    pub min: f64,
    pub max: f64,
}

impl WavelengthRange {
    pub fn check(&self, wavelength: f64) -> Result<(), DeviceError> {
        if wavelength < self.min || wavelength > self.max {
            return Err(DeviceError::InvalidArgument(format!(
                "wavelength {} outside {}..{} nm",
                wavelength, self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Operations every instrument accepts
static GENERIC_COMMANDS: &[CommandSpec] = &[
    command("run_identify", &[], &[Query("*IDN?")]),
    command("run_write", &["command"], &[Write("{0}")]),
    command("run_query", &["command"], &[Query("{0}")]),
];

pub static AGILENT_DSO7000A: InstrumentModel = InstrumentModel {
    driver_type: "AgilentDSO7000A",
    commands: &[
        command("run_measure_set_source", &["channel_num"], &[Write(":MEASURE:SOURCE CHANNEL{0}")]),
        command("run_measure_vpp", &["channel_num"], &[Query(":MEAS:VPP? CHAN{0}")])
            .or_bare(&[Query(":MEAS:VPP?")]),
        command("run_measure_vaverage", &["channel_num"], &[Query(":MEAS:VAV? CHAN{0}")])
            .or_bare(&[Query(":MEAS:VAV?")]),
        command("run_measure_clear", &[], &[Write(":MEAS:CLE")]),
        command("run_measure_duty_cycle", &["channel_num"], &[Query(":MEAS:DUTY? CHAN{0}")])
            .or_bare(&[Query(":MEAS:DUTY?")]),
        command("run_measure_fall_time", &["channel_num"], &[Query(":MEAS:FALL? CHAN{0}")])
            .or_bare(&[Query(":MEAS:FALL?")]),
        command("run_measure_frequency", &["channel_num"], &[Query(":MEAS:FREQ? CHAN{0}")])
            .or_bare(&[Query(":MEAS:FREQ?")]),
        command("run_measure_nwidth", &["channel_num"], &[Query(":MEAS:NWID? CHAN{0}")])
            .or_bare(&[Query(":MEAS:NWID?")]),
        command("run_measure_overshoot", &["channel_num"], &[Query(":MEAS:OVER? CHAN{0}")])
            .or_bare(&[Query(":MEAS:OVER?")]),
        command("run_measure_period", &["channel_num"], &[Query(":MEAS:PER? CHAN{0}")])
            .or_bare(&[Query(":MEAS:PER?")]),
        command("run_measure_phase", &["channel_num"], &[Query(":MEAS:PHAS? CHAN{0}")])
            .or_bare(&[Query(":MEAS:PHAS?")]),
        command("run_measure_preshoot", &["channel_num"], &[Query(":MEAS:PRES? CHAN{0}")])
            .or_bare(&[Query(":MEAS:PRES?")]),
        command("run_measure_pulse_width", &["channel_num"], &[Query(":MEAS:PWID? CHAN{0}")])
            .or_bare(&[Query(":MEAS:PWID?")]),
        command(
            "run_measure_results",
            &["channel_num"],
            &[Write(":MEAS:STAT 1"), Query(":MEAS:RES? CHAN{0}")],
        )
        .or_bare(&[Write(":MEAS:STAT 1"), Query(":MEAS:RES?")])
        .statistics(),
        command("run_start_acquisition", &[], &[Write(":RUN")]),
        command("run_single_acquisition", &[], &[Write(":SINGLE")]),
        command("run_stop_acquisition", &[], &[Write(":STOP")]),
        command("run_set_channel_coupling", &["channel_num", "acdc"], &[Write(":CHAN{0}:COUP {1}")]),
        command("run_set_channel_label", &["channel_num", "label"], &[Write(":CHAN{0}:LAB {1}")]),
        command("run_set_channel_impedance", &["channel_num", "imp"], &[Write(":CHAN{0}:IMP {1}")]),
        command("run_set_channel_scale", &["channel_num", "scale"], &[Write(":CHAN{0}:SCALE {1}")]),
        command(
            "run_save_capture",
            &["name"],
            &[Write("SAVE:FIL {0}"), Write(":SAVE:IMAG"), Query(":SAVE:PWD?"), Query("SAVE:FIL?")],
        )
        .or_bare(&[Write("SAVE:FIL Image"), Write(":SAVE:IMAG"), Query(":SAVE:PWD?"), Query("SAVE:FIL?")]),
        command("run_time_range", &["time_val"], &[Write(":TIM:RANG {0}")]),
        command("run_time_scale", &["time_val"], &[Write(":TIM:SCAL {0}")]),
        command("run_time_window_scale", &["time_val"], &[Write(":TIM:WIND:SCAL {0}")]),
        command("run_trigger_mode", &["mode"], &[Write(":TRIG:MODE {0}")]),
    ],
    wavelength_range: None,
};

pub static SANTEC_TSL_210H: InstrumentModel = InstrumentModel {
    driver_type: "TSL_210H",
    commands: &[
        command("run_get_max_wavelength", &[], &[Tune(Tuning::MaxWavelength)]),
        command("run_get_min_wavelength", &[], &[Tune(Tuning::MinWavelength)]),
        command("run_set_wavelength", &["wavelength"], &[Tune(Tuning::SetWavelength)]),
        command("run_get_wavelength", &[], &[Query("WA")]),
        command(
            "run_sweep_setup",
            &["start_wavelength", "end_wavelength", "step_wavelength"],
            &[Tune(Tuning::SweepSetup)],
        ),
        command("run_start_sweep", &[], &[Tune(Tuning::StartSweep)]),
        command("run_sweep_step", &[], &[Tune(Tuning::SweepStep)]),
        command("run_pause_sweep", &[], &[Write("WA")]),
        command("run_stop_sweep", &[], &[Write("LF")]),
        command("run_check_status", &[], &[Query("SU")]),
        command("run_get_status", &[], &[Query("SU")]),
        command("run_turn_output_on", &[], &[Write("LO")]),
        command("run_turn_output_off", &[], &[Write("LF")]),
        command("run_set_power", &["optical_power"], &[Write("OP{0}")]),
        command("run_get_power", &[], &[Query("OP")]),
        command("run_set_power_mw", &["power_mw"], &[Write("LP{0}")]),
        command("run_get_power_mw", &[], &[Query("LP")]),
        command("run_set_current", &["milliamps"], &[Write("CU{0}")]),
        command("run_get_current", &[], &[Query("CU")]),
        command("run_set_temperature", &["temperature_c"], &[Write("TL{0}")]),
        command("run_get_temperature", &[], &[Query("TL")]),
        command("run_set_ACC", &[], &[Write("AO")]),
        command("run_set_APC", &[], &[Write("AF")]),
        command("run_coherence_on", &[], &[Write("CO")]),
        command("run_coherence_off", &[], &[Write("CF")]),
        command("run_set_coherence", &["coherence"], &[Write("CV{0}")]),
        command("run_get_coherence", &[], &[Query("CV")]),
    ],
    wavelength_range: Some(WavelengthRange {
        min: 1510.0,
        max: 1580.0,
    }),
};

const PETB_PINS: &[&str] = &["modsel", "reset", "modprs", "int", "lpmode", "all"];
const ADC_CHANNELS: &[&str] = &["00", "0e", "10", "13", "16", "17"];

fn one_of(value: &str, allowed: &[&str], what: &str) -> Result<(), String> {
    if allowed.contains(&value.trim()) {
        Ok(())
    } else {
        Err(format!("invalid {} '{}', expected one of {}", what, value, allowed.join(", ")))
    }
}

fn in_range(value: &str, max: u8, what: &str) -> Result<(), String> {
    match value.trim().parse::<u8>() {
        Ok(n) if n <= max => Ok(()),
        _ => Err(format!("invalid {} '{}', expected 0 to {}", what, value, max)),
    }
}

fn petb_pin(args: &[String]) -> Result<(), String> {
    one_of(&args[0], PETB_PINS, "pin")
}

fn pek_pin_port(args: &[String]) -> Result<(), String> {
    in_range(&args[0], 7, "pin")?;
    in_range(&args[1], 3, "port")
}

fn pek_write(args: &[String]) -> Result<(), String> {
    pek_pin_port(args)?;
    in_range(&args[2], 1, "value")
}

fn adc_channel(args: &[String]) -> Result<(), String> {
    one_of(&args[0], ADC_CHANNELS, "channel")
}

/// `0x00` to `0xFF`, upper-case hex digits
fn i2c_address(args: &[String]) -> Result<(), String> {
    let address = args[0].trim();
    let valid = address
        .strip_prefix("0x")
        .and_then(|digits| digits.get(..2))
        .map_or(false, |digits| {
            digits.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        });
    if valid {
        Ok(())
    } else {
        Err(format!("invalid I2C address '{}'", address))
    }
}

/// Text console of the VCU108 evaluation board; the board firmware places
/// `port` before `pin` in its gpio commands
pub static XILINX_VCU108: InstrumentModel = InstrumentModel {
    driver_type: "Xilinx_VCU108",
    commands: &[
        command(
            "run_eyescan",
            &["range_value", "scale_factor", "horizontal", "vertical", "drp", "step"],
            &[Until("petb eyescan {0} {1} {2} {3} {4} {5}", "END")],
        )
        .or_bare(&[Until("petb eyescan 0 0 127 512 0 2", "END")]),
        command("run_raw_command", &["command"], &[Drain("{0}")]),
        command("run_petb_read", &["pin"], &[Drain("petb gpio read 0 {0}")]).validated(petb_pin),
        command("run_petb_set", &["pin"], &[Drain("petb gpio set 0 {0}")]).validated(petb_pin),
        command("run_petb_clear", &["pin"], &[Drain("petb gpio clear 0 {0}")]).validated(petb_pin),
        command("run_petb_toggle", &["pin"], &[Drain("petb gpio toggle 0 {0}")]).validated(petb_pin),
        command("run_pek_read", &["pin", "port"], &[Drain("pek gpio read {1} {0}")])
            .or_bare(&[Drain("pek gpio read 0 0")])
            .validated(pek_pin_port),
        command("run_pek_set", &["pin", "port"], &[Drain("pek gpio set {1} {0}")])
            .or_bare(&[Drain("pek gpio set 0 0")])
            .validated(pek_pin_port),
        command("run_pek_clear", &["pin", "port"], &[Drain("pek gpio clear {1} {0}")])
            .or_bare(&[Drain("pek gpio clear 0 0")])
            .validated(pek_pin_port),
        command("run_pek_toggle", &["pin", "port"], &[Drain("pek gpio toggle {1} {0}")])
            .or_bare(&[Drain("pek gpio toggle 0 0")])
            .validated(pek_pin_port),
        command("run_pek_write", &["pin", "port", "value"], &[Drain("pek gpio write {1} {0} {2}")])
            .validated(pek_write),
        command("run_pek_list", &[], &[Drain("pek gpio list")]),
        command("run_adc_read", &["channel"], &[Drain("adc read {0}")])
            .or_bare(&[Drain("adc read 00")])
            .validated(adc_channel),
        command("run_dac_write", &["value"], &[Drain("dac write {0}")]),
        command("run_spixfer", &["value"], &[Drain("spixfer {0}")]),
        command("run_spilib", &["value"], &[Drain("spilib {0}")]),
        command("run_i2cwrite", &["address", "value"], &[Drain("i2cwrite {0} {1}")]).validated(i2c_address),
        command("run_i2cread", &["address"], &[Drain("i2cread {0}")]).validated(i2c_address),
    ],
    wavelength_range: None,
};

/// Every built-in instrument model
pub static BUILTIN_MODELS: &[&InstrumentModel] = &[&AGILENT_DSO7000A, &SANTEC_TSL_210H, &XILINX_VCU108];

impl InstrumentModel {
    fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter().chain(GENERIC_COMMANDS.iter())
    }

    pub fn command(&self, operation: &str) -> Option<&CommandSpec> {
        self.commands().find(|c| c.operation() == operation)
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.commands()
            .fold(CapabilityDescriptor::new(), |descriptor, command| {
                descriptor.with_operation(command.operation(), command.parameters())
            })
    }
}

/// Turn a `Label(n),value,...,Label(n),value,...` results line into a JSON
/// object of label to values
pub fn parse_statistics(reply: &str) -> Result<String, DeviceError> {
    let mut table = serde_json::Map::new();
    let mut current: Option<String> = None;

    for field in reply.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        if let Some(label) = statistics_label(field) {
            table.insert(label.to_string(), serde_json::Value::Array(Vec::new()));
            current = Some(label.to_string());
            continue;
        }
        let values = current
            .as_ref()
            .and_then(|label| table.get_mut(label))
            .and_then(serde_json::Value::as_array_mut)
            .ok_or_else(|| DeviceError::UnexpectedReply(reply.to_string()))?;
        values.push(serde_json::Value::String(field.to_string()));
    }

    serde_json::to_string(&table).map_err(|e| DeviceError::UnexpectedReply(e.to_string()))
}

fn statistics_label(field: &str) -> Option<&str> {
    let (label, rest) = field.split_once('(')?;
    let well_formed = !label.is_empty()
        && rest.ends_with(')')
        && label.chars().all(|c| c.is_ascii_alphabetic() || c == '-' || c == ' ');
    well_formed.then_some(label.trim())
}
