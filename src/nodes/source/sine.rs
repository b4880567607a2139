//! Sine wave oscillator

use dasp_graph::Buffer;

use crate::id::SignalRef;
use crate::ugen::{Ramp, Signal, Signals, UnitGenerator};

/// A sine oscillator. The frequency is either fixed or read from another
/// signal of the same instrument, in Hz.
#[derive(Clone, Debug)]
pub struct Sine {
    frequency: f32,
    modulator: Option<SignalRef>,
    ramp: Ramp,
    amplitude: f32,
    phase: f32,
    out: Buffer,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency.max(0.0),
            modulator: None,
            ramp: Ramp::default(),
            amplitude: 0.25, // -12dB, safe default
            phase: 0.0,
            out: Buffer::SILENT,
        }
    }

    /// An oscillator whose frequency follows `frequency`. Block-rate
    /// frequencies glide linearly across each block.
    pub fn modulated(frequency: SignalRef) -> Self {
        Self {
            modulator: Some(frequency),
            ..Self::new(0.0)
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// The fixed frequency; zero for a modulated oscillator.
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}

impl UnitGenerator for Sine {
    fn inputs(&self) -> &[SignalRef] {
        self.modulator.as_slice()
    }

    fn compute(&mut self, signals: &Signals<'_>) {
        let rate = signals.sample_rate() as f32;
        let modulator = self.modulator.map(|m| self.ramp.read(signals.get(m)));

        for (i, sample) in self.out.iter_mut().enumerate() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * self.amplitude;

            let hz = modulator.map_or(self.frequency, |m| m.at(i));
            self.phase += hz / rate;
            // negative or above-Nyquist frequencies still wrap into [0, 1)
            self.phase -= self.phase.floor();
        }
    }

    fn output(&self, output: u16) -> Option<Signal<'_>> {
        (output == 0).then_some(Signal::Audio(&self.out))
    }
}
