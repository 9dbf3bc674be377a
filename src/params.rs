//! Translation of normalized speech parameters into each backend's units.
//!
//! Callers work with one scale for every engine:
//!
//! | Parameter | Range        |
//! |-----------|--------------|
//! | rate      | -100 ..= 100 |
//! | pitch     | -100 ..= 100 |
//! | volume    | 0 ..= 100    |
//!
//! Inputs are clamped to those ranges before mapping, so every output stays
//! inside the bounds documented on its struct no matter what is passed in.

pub const RATE_MIN: i32 = -100;
pub const RATE_MAX: i32 = 100;
pub const PITCH_MIN: i32 = -100;
pub const PITCH_MAX: i32 = 100;
pub const VOLUME_MIN: i32 = 0;
pub const VOLUME_MAX: i32 = 100;

/// Normalized parameters as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechParams {
    pub rate: i32,
    pub pitch: i32,
    pub volume: i32,
}

impl SpeechParams {
    pub fn new(rate: i32, pitch: i32, volume: i32) -> Self {
        Self {
            rate: rate.clamp(RATE_MIN, RATE_MAX),
            pitch: pitch.clamp(PITCH_MIN, PITCH_MAX),
            volume: volume.clamp(VOLUME_MIN, VOLUME_MAX),
        }
    }

    pub fn to_speechd(self) -> SpeechdParams {
        SpeechdParams {
            rate: self.rate,
            pitch: self.pitch,
            volume: (self.volume * 2 - 100).clamp(-100, 100),
        }
    }

    pub fn to_espeak(self) -> EspeakParams {
        let wpm = 175 + (f64::from(self.rate) * 1.5) as i32;
        let pitch = 50 + (f64::from(self.pitch) * 0.5) as i32;
        let amplitude = if self.volume > 0 {
            (self.volume * 2).max(10)
        } else {
            10
        };
        EspeakParams {
            words_per_minute: wpm.clamp(80, 450),
            pitch: pitch.clamp(0, 99),
            amplitude: amplitude.min(200),
        }
    }

    pub fn to_piper(self) -> PiperParams {
        let rate = f64::from(self.rate) / 100.0;
        // Lower length_scale means faster speech.
        let length_scale = if rate >= 0.0 {
            1.0 - rate * 0.7
        } else {
            1.0 - rate * 1.5
        };
        let noise_scale = 0.667 + (f64::from(self.pitch) / 100.0) * 0.333;
        let volume_factor = if self.volume > 0 {
            (f64::from(self.volume) / 50.0).clamp(0.2, 2.0)
        } else {
            0.2
        };
        PiperParams {
            length_scale,
            noise_scale,
            noise_w: PIPER_NOISE_W,
            sentence_silence: PIPER_SENTENCE_SILENCE,
            volume_factor,
        }
    }
}

/// speech-dispatcher units: every value in -100 ..= 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechdParams {
    pub rate: i32,
    pub pitch: i32,
    pub volume: i32,
}

/// espeak-ng units: speed 80 ..= 450 WPM, pitch 0 ..= 99, amplitude 10 ..= 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspeakParams {
    pub words_per_minute: i32,
    pub pitch: i32,
    pub amplitude: i32,
}

pub const PIPER_NOISE_W: f64 = 0.8;
pub const PIPER_SENTENCE_SILENCE: f64 = 0.2;

/// Piper units. `length_scale` lies in 0.3 ..= 2.5, `noise_scale` in
/// 0.334 ..= 1.0 and `volume_factor` in 0.2 ..= 2.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PiperParams {
    pub length_scale: f64,
    pub noise_scale: f64,
    pub noise_w: f64,
    pub sentence_silence: f64,
    /// Gain applied by the optional volume-filter stage.
    pub volume_factor: f64,
}
