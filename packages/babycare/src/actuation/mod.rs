//! Soothing actuation: which actuator to start on a cry, and when to stop.
//!
//! The state machine is fed one [`CryClass`] per detection cycle.
//!
//! * **cry** resets the “not cry” counter and, when idle, starts exactly one
//!   actuator picked by [`SoothingMode`].
//! * **not cry** bumps the counter (saturating); the cycle on which it
//!   reaches the debounce count stops whatever is active.

mod sound;
mod toy;

#[cfg(feature = "audio")]
pub use sound::SoundPlayer;
pub use sound::{SilentSound, SoundActuator, SoundError};
#[cfg(feature = "http-toy")]
pub use toy::HttpToy;
pub use toy::{LogToy, ToyActuator, ToyError, ToyHandle, ToyWorker};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    classifier::CryClass,
    constants::{STOP_COUNT_SATURATION, STOP_DEBOUNCE},
    light::LightLevel,
};

/// How a detected cry is answered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SoothingMode {
    /// Always loop a sound.
    PlaySound,
    /// Always switch the toy on.
    PlayToy,
    /// Sound in the dark, toy otherwise.
    #[default]
    Auto,
}

/// Bundled soothing sounds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SoundChoice {
    #[default]
    Twinkle,
    RockABye,
    Rain,
    WhiteNoise,
}

impl SoundChoice {
    /// File name of the asset inside the sounds directory.
    pub fn asset_name(self) -> String {
        format!("{self}.wav")
    }
}

/// Actuator that was started for the current soothing episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    Sound(SoundChoice),
    Toy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoothingState {
    #[default]
    Idle,
    Active(Actuator),
}

/// What a call to [`ActuationStateMachine::on_class`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started(Actuator),
    Stopped(Actuator),
}

/// Per-session actuation state. Owned by the detection loop.
pub struct ActuationStateMachine {
    mode: SoothingMode,
    sound_choice: SoundChoice,
    stop_debounce: u32,
    stop_cry_count: u32,
    state: SoothingState,
    light: Arc<LightLevel>,
    sound: Box<dyn SoundActuator>,
    toy: ToyHandle,
}

impl ActuationStateMachine {
    pub fn new(
        mode: SoothingMode,
        sound_choice: SoundChoice,
        light: Arc<LightLevel>,
        sound: Box<dyn SoundActuator>,
        toy: ToyHandle,
    ) -> Self {
        Self {
            mode,
            sound_choice,
            stop_debounce: STOP_DEBOUNCE,
            stop_cry_count: 0,
            state: SoothingState::Idle,
            light,
            sound,
            toy,
        }
    }

    /// Override the number of consecutive “not cry” cycles that stop soothing.
    pub fn with_stop_debounce(mut self, cycles: u32) -> Self {
        self.stop_debounce = cycles.clamp(1, STOP_COUNT_SATURATION);
        self
    }

    #[inline]
    pub fn state(&self) -> SoothingState {
        self.state
    }

    #[inline]
    pub fn stop_cry_count(&self) -> u32 {
        self.stop_cry_count
    }

    #[inline]
    pub fn mode(&self) -> SoothingMode {
        self.mode
    }

    /// Advance the machine by one classified cycle.
    pub fn on_class(&mut self, class: CryClass) -> Option<Transition> {
        match class {
            CryClass::Cry => {
                self.stop_cry_count = 0;
                match self.state {
                    SoothingState::Idle => {}
                    SoothingState::Active(Actuator::Sound(choice)) => {
                        // playback can die under us (missing asset, lost device)
                        if !self.sound.is_playing() {
                            warn!("{choice} is not playing, restarting it");
                            self.sound.start(choice);
                        }
                        return None;
                    }
                    SoothingState::Active(Actuator::Toy) => return None,
                }
                let actuator = self.select_actuator();
                self.start(actuator);
                self.state = SoothingState::Active(actuator);
                info!("cry detected, soothing with {actuator:?}");
                Some(Transition::Started(actuator))
            }
            CryClass::NotCry => {
                if self.stop_cry_count < STOP_COUNT_SATURATION {
                    self.stop_cry_count += 1;
                }
                // equality, not >=: a saturated counter never re-triggers
                if self.stop_cry_count != self.stop_debounce {
                    return None;
                }
                // the toy-off goes out even when idle; an earlier command may have been lost
                self.toy.switch(false);
                if self.sound.is_playing() {
                    self.sound.stop();
                }
                let SoothingState::Active(actuator) = self.state else {
                    return None;
                };
                self.state = SoothingState::Idle;
                info!("baby calm for {} cycles, stopped {actuator:?}", self.stop_debounce);
                Some(Transition::Stopped(actuator))
            }
        }
    }

    /// Stop any running sound and switch the toy off if it was on.
    pub fn shutdown(&mut self) {
        if let SoothingState::Active(actuator) = self.state {
            self.stop(actuator);
            self.state = SoothingState::Idle;
        }
        if self.sound.is_playing() {
            self.sound.stop();
        }
    }

    fn select_actuator(&self) -> Actuator {
        let sound = Actuator::Sound(self.sound_choice);
        match self.mode {
            SoothingMode::PlaySound => sound,
            SoothingMode::PlayToy => Actuator::Toy,
            SoothingMode::Auto => {
                let dark = self.light.needs_sleep();
                debug!("auto mode, lux {:?}, dark = {dark}", self.light.lux());
                if dark { sound } else { Actuator::Toy }
            }
        }
    }

    fn start(&mut self, actuator: Actuator) {
        match actuator {
            Actuator::Sound(choice) => {
                if !self.sound.is_playing() {
                    self.sound.start(choice);
                }
            }
            Actuator::Toy => self.toy.switch(true),
        }
    }

    fn stop(&mut self, actuator: Actuator) {
        match actuator {
            Actuator::Sound(_) => self.sound.stop(),
            Actuator::Toy => self.toy.switch(false),
        }
    }
}
