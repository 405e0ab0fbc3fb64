//! Ordered register plans that arm and tear down the pulse output.
//!
//! Reconfiguring a DIO_EF feature while it is enabled is ignored by the
//! device, so every start plan disables the shared clock and each channel
//! feature before touching its configuration, and re-enables them only
//! afterwards. The order of writes inside a [`RegisterPlan`] is therefore
//! part of its meaning.

use heapless::Vec;

use crate::timing::ClockPlan;

pub mod catalog;

pub use catalog::{
    ClockSource, DataType, DioChannel, FeatureIndex, HIGH_SPEED_COUNTER_CHANNELS,
    PULSE_OUTPUT_CHANNELS, Register, RegisterName,
};

/// Longest plan the builders emit (finite train with a counter) plus headroom.
pub const MAX_PLAN_WRITES: usize = 16;

/// A single named register assignment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegisterWrite {
    pub register: Register,
    pub value: u32,
}

impl RegisterWrite {
    #[must_use]
    pub const fn new(register: Register, value: u32) -> Self {
        Self { register, value }
    }

    /// LJM name of the target register.
    #[must_use]
    pub fn name(&self) -> RegisterName {
        self.register.name()
    }
}

/// Ordered sequence of register writes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RegisterPlan {
    writes: Vec<RegisterWrite, MAX_PLAN_WRITES>,
}

impl RegisterPlan {
    #[must_use]
    pub const fn new() -> Self {
        Self { writes: Vec::new() }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn iter(&self) -> core::slice::Iter<'_, RegisterWrite> {
        self.writes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    fn push(&mut self, register: Register, value: u32) {
        let pushed = self.writes.push(RegisterWrite::new(register, value));
        debug_assert!(pushed.is_ok(), "register plan exceeded MAX_PLAN_WRITES");
    }
}

impl<'a> IntoIterator for &'a RegisterPlan {
    type Item = &'a RegisterWrite;
    type IntoIter = core::slice::Iter<'a, RegisterWrite>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.iter()
    }
}

/// Which DIO lines and clock source a run drives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelLayout {
    pub clock: ClockSource,
    pub output: DioChannel,
    /// Optional line counting the emitted edges.
    pub counter: Option<DioChannel>,
}

impl ChannelLayout {
    #[must_use]
    pub const fn new(clock: ClockSource, output: DioChannel, counter: Option<DioChannel>) -> Self {
        Self {
            clock,
            output,
            counter,
        }
    }
}

/// Waveform the output channel is armed with.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputFeature {
    /// PWM until the stop plan runs.
    Continuous,
    /// Pulse-out that stops by itself after `pulse_count` periods.
    FiniteTrain { pulse_count: u32 },
}

impl OutputFeature {
    #[must_use]
    pub const fn index(self) -> FeatureIndex {
        match self {
            OutputFeature::Continuous => FeatureIndex::PwmOut,
            OutputFeature::FiniteTrain { .. } => FeatureIndex::PulseOut,
        }
    }
}

/// Builds the write sequence that configures the clock, the output feature
/// and, when present, the counter.
#[must_use]
pub fn build_start_plan(
    clock: &ClockPlan,
    feature: OutputFeature,
    layout: &ChannelLayout,
) -> RegisterPlan {
    let mut plan = RegisterPlan::new();
    let output = layout.output;

    plan.push(Register::ClockEnable(layout.clock), 0);
    plan.push(Register::ClockDivisor(layout.clock), clock.clock_divisor);
    plan.push(Register::ClockRollValue(layout.clock), clock.roll_value_ticks);
    plan.push(Register::ClockEnable(layout.clock), 1);

    plan.push(Register::FeatureEnable(output), 0);
    plan.push(Register::FeatureSelect(output), feature.index().value());
    plan.push(Register::ConfigA(output), clock.on_ticks);
    if let OutputFeature::FiniteTrain { pulse_count } = feature {
        plan.push(Register::ConfigB(output), 0);
        plan.push(Register::ConfigC(output), pulse_count);
    }
    plan.push(Register::FeatureEnable(output), 1);

    if let Some(counter) = layout.counter {
        plan.push(Register::FeatureEnable(counter), 0);
        plan.push(
            Register::FeatureSelect(counter),
            FeatureIndex::HighSpeedCounter.value(),
        );
        plan.push(Register::FeatureEnable(counter), 1);
    }

    plan
}

/// Builds the teardown sequence: clock off, output feature off, counter off.
#[must_use]
pub fn build_stop_plan(layout: &ChannelLayout) -> RegisterPlan {
    let mut plan = RegisterPlan::new();
    plan.push(Register::ClockEnable(layout.clock), 0);
    plan.push(Register::FeatureEnable(layout.output), 0);
    if let Some(counter) = layout.counter {
        plan.push(Register::FeatureEnable(counter), 0);
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{T7_CORE_CLOCK_HZ, solve};

    const PWM: DioChannel = DioChannel::new(0);
    const COUNTER: DioChannel = DioChannel::new(18);
    const CLOCK0: ClockSource = ClockSource::new(0);

    fn names(plan: &RegisterPlan) -> Vec<RegisterName, MAX_PLAN_WRITES> {
        plan.iter().map(RegisterWrite::name).collect()
    }

    fn values(plan: &RegisterPlan) -> Vec<u32, MAX_PLAN_WRITES> {
        plan.iter().map(|write| write.value).collect()
    }

    #[test]
    fn continuous_plan_with_counter_matches_reference_sequence() {
        let clock = solve(T7_CORE_CLOCK_HZ, 1, 10_000, 25.0).expect("representable");
        let layout = ChannelLayout::new(CLOCK0, PWM, Some(COUNTER));
        let plan = build_start_plan(&clock, OutputFeature::Continuous, &layout);

        let expected = [
            "DIO_EF_CLOCK0_ENABLE",
            "DIO_EF_CLOCK0_DIVISOR",
            "DIO_EF_CLOCK0_ROLL_VALUE",
            "DIO_EF_CLOCK0_ENABLE",
            "DIO0_EF_ENABLE",
            "DIO0_EF_INDEX",
            "DIO0_EF_CONFIG_A",
            "DIO0_EF_ENABLE",
            "DIO18_EF_ENABLE",
            "DIO18_EF_INDEX",
            "DIO18_EF_ENABLE",
        ];
        let actual = names(&plan);
        assert_eq!(actual.len(), expected.len());
        for (name, expected) in actual.iter().zip(expected) {
            assert_eq!(name, expected);
        }
        assert_eq!(
            values(&plan).as_slice(),
            &[0, 1, 8_000, 1, 0, 0, 2_000, 1, 0, 7, 1]
        );
    }

    #[test]
    fn finite_train_plan_carries_pulse_count_in_config_c() {
        let clock = solve(T7_CORE_CLOCK_HZ, 8, 10_000, 10.0).expect("representable");
        let layout = ChannelLayout::new(CLOCK0, PWM, None);
        let plan = build_start_plan(&clock, OutputFeature::FiniteTrain { pulse_count: 7 }, &layout);

        let expected = [
            (Register::ClockEnable(CLOCK0), 0),
            (Register::ClockDivisor(CLOCK0), 8),
            (Register::ClockRollValue(CLOCK0), 1_000),
            (Register::ClockEnable(CLOCK0), 1),
            (Register::FeatureEnable(PWM), 0),
            (Register::FeatureSelect(PWM), 2),
            (Register::ConfigA(PWM), 100),
            (Register::ConfigB(PWM), 0),
            (Register::ConfigC(PWM), 7),
            (Register::FeatureEnable(PWM), 1),
        ];
        assert_eq!(plan.len(), expected.len());
        for (write, (register, value)) in plan.iter().zip(expected) {
            assert_eq!(write.register, register);
            assert_eq!(write.value, value);
        }
    }

    #[test]
    fn every_feature_is_disabled_before_it_is_configured() {
        let clock = solve(T7_CORE_CLOCK_HZ, 8, 1_000, 50.0).expect("representable");
        let layout = ChannelLayout::new(CLOCK0, PWM, Some(COUNTER));
        let plan = build_start_plan(&clock, OutputFeature::FiniteTrain { pulse_count: 3 }, &layout);

        let mut clock_enabled = true;
        let mut enabled = [true; 23];
        for write in &plan {
            match write.register {
                Register::ClockEnable(_) => clock_enabled = write.value != 0,
                Register::ClockDivisor(_) | Register::ClockRollValue(_) => {
                    assert!(!clock_enabled, "{} written while clock enabled", write.name());
                }
                Register::FeatureEnable(dio) => {
                    enabled[usize::from(dio.number())] = write.value != 0;
                }
                Register::FeatureSelect(dio)
                | Register::ConfigA(dio)
                | Register::ConfigB(dio)
                | Register::ConfigC(dio) => {
                    assert!(
                        !enabled[usize::from(dio.number())],
                        "{} written while feature enabled",
                        write.name()
                    );
                }
                Register::ReadA(_) | Register::DigitalState(_) => {
                    panic!("unexpected register {}", write.name());
                }
            }
        }
        assert!(clock_enabled);
        assert!(enabled[0]);
        assert!(enabled[18]);
    }

    #[test]
    fn stop_plan_disables_clock_output_and_counter() {
        let layout = ChannelLayout::new(CLOCK0, PWM, Some(COUNTER));
        let plan = build_stop_plan(&layout);

        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|write| write.value == 0));
        assert_eq!(plan.as_slice()[0].register, Register::ClockEnable(CLOCK0));
        assert_eq!(plan.as_slice()[1].register, Register::FeatureEnable(PWM));
        assert_eq!(plan.as_slice()[2].register, Register::FeatureEnable(COUNTER));
    }

    #[test]
    fn stop_plan_skips_unconfigured_counter() {
        let layout = ChannelLayout::new(CLOCK0, PWM, None);
        let plan = build_stop_plan(&layout);

        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|write| write.value == 0));
    }
}
