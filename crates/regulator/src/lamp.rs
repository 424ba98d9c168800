//! Heat-lamp actuation over software PWM. The `gpio` feature gates the real
//! rppal driver; without it, a mock lamp records what it was asked to do.
//!
//! The lamp circuit is active-low: the control output is a heating demand in
//! percent, and the pin duty that produces it is `100 - output`.

use anyhow::Result;
use tracing::{debug, info};

#[cfg(feature = "gpio")]
use anyhow::Context;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};
#[cfg(feature = "gpio")]
use tracing::warn;

/// Software PWM frequency on the lamp pin.
pub const PWM_FREQUENCY_HZ: f64 = 100.0;

/// Duty that keeps the lamp dark (inverted polarity: full duty is off).
pub const SAFE_DUTY_PCT: f64 = 100.0;

/// Map a control output (heating demand, percent) to the lamp's inverted
/// duty convention. Clamps again on the way out so a bad upstream gain
/// change cannot push the pin outside its range.
pub fn duty_for_output(output: f64) -> f64 {
    (100.0 - output).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Real lamp (production, requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct HeatLamp {
    pin: OutputPin,
    bcm_pin: u8,
}

#[cfg(feature = "gpio")]
impl HeatLamp {
    /// Claim the pin and park it at the safe duty before the first cycle.
    pub fn new(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().context("failed to open GPIO")?;
        let mut pin = gpio
            .get(bcm_pin)
            .with_context(|| format!("failed to claim GPIO {bcm_pin}"))?
            .into_output_high();
        pin.set_pwm_frequency(PWM_FREQUENCY_HZ, SAFE_DUTY_PCT / 100.0)
            .context("failed to start lamp PWM")?;
        info!(pin = bcm_pin, "heat lamp attached, parked at safe duty");
        Ok(Self { pin, bcm_pin })
    }

    /// Command a duty cycle in percent. A command failure is logged and the
    /// pin keeps whatever it was last doing.
    pub fn apply_duty(&mut self, duty_pct: f64) {
        let duty = duty_pct.clamp(0.0, 100.0);
        if let Err(e) = self.pin.set_pwm_frequency(PWM_FREQUENCY_HZ, duty / 100.0) {
            warn!(pin = self.bcm_pin, duty, "lamp PWM command failed: {e}");
        } else {
            debug!(pin = self.bcm_pin, duty, "lamp duty set");
        }
    }

    /// Park at the safe duty and stop the PWM thread. Called on shutdown.
    pub fn release(&mut self) {
        if let Err(e) = self.pin.set_pwm_frequency(PWM_FREQUENCY_HZ, SAFE_DUTY_PCT / 100.0) {
            warn!(pin = self.bcm_pin, "failed to park lamp at safe duty: {e}");
        }
        if let Err(e) = self.pin.clear_pwm() {
            warn!(pin = self.bcm_pin, "failed to stop lamp PWM: {e}");
        }
        info!(pin = self.bcm_pin, "heat lamp released");
    }
}

// ---------------------------------------------------------------------------
// Mock lamp (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct HeatLamp {
    bcm_pin: u8,
    pub(crate) last_duty_pct: f64,
    pub(crate) released: bool,
}

#[cfg(not(feature = "gpio"))]
impl HeatLamp {
    pub fn new(bcm_pin: u8) -> Result<Self> {
        info!(pin = bcm_pin, "mock heat lamp attached (no hardware)");
        Ok(Self {
            bcm_pin,
            last_duty_pct: SAFE_DUTY_PCT,
            released: false,
        })
    }

    pub fn apply_duty(&mut self, duty_pct: f64) {
        self.last_duty_pct = duty_pct.clamp(0.0, 100.0);
        debug!(
            pin = self.bcm_pin,
            duty = self.last_duty_pct,
            "mock lamp duty set"
        );
    }

    pub fn release(&mut self) {
        self.last_duty_pct = SAFE_DUTY_PCT;
        self.released = true;
        info!(pin = self.bcm_pin, "mock heat lamp released");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
