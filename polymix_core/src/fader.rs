//! Scalar parameter automation.
//!
//! A [`Fader`] is either idle, a linear ramp, or a low-frequency oscillator. The mixer
//! steps every live fader once per output buffer with the current stream time; the
//! same type doubles as the pause/stop scheduler (ramp from 1 to 0, act on `Finished`).

use std::f64::consts::TAU;

/// Outcome of evaluating a fader at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaderStep {
    /// Nothing is scheduled.
    Idle,
    /// The fader is in flight and produced this value.
    Running(f32),
    /// A ramp reached its end on this step. The fader is idle afterwards.
    Finished(f32),
}

impl FaderStep {
    /// The produced value, if any.
    pub fn value(self) -> Option<f32> {
        match self {
            FaderStep::Idle => None,
            FaderStep::Running(v) | FaderStep::Finished(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Fader {
    #[default]
    Inactive,
    Ramp {
        from: f32,
        to: f32,
        delta: f32,
        current: f32,
        duration: f64,
        start: f64,
        end: f64,
    },
    Lfo {
        base: f32,
        amplitude: f32,
        omega: f64,
        start: f64,
    },
}

impl Fader {
    /// Linear ramp from `from` to `to` over `duration` seconds, starting at `start`.
    ///
    /// A non-positive duration finishes on the first evaluation and yields `to`.
    pub fn ramp(from: f32, to: f32, duration: f64, start: f64) -> Self {
        Fader::Ramp {
            from,
            to,
            delta: to - from,
            current: from,
            duration,
            start,
            end: start + duration,
        }
    }

    /// Sine oscillation between `from` and `to` with a period of `duration` seconds.
    pub fn lfo(from: f32, to: f32, duration: f64, start: f64) -> Self {
        let amplitude = (to - from).abs() * 0.5;
        let omega = if duration > 0.0 { TAU / duration } else { 0.0 };
        Fader::Lfo {
            base: from.min(to) + amplitude,
            amplitude,
            omega,
            start,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self, Fader::Inactive)
    }

    #[inline]
    pub fn clear(&mut self) {
        *self = Fader::Inactive;
    }

    /// Evaluate the fader at stream time `now`.
    ///
    /// If `now` lies before the recorded start (the stream clock was reset), the fader
    /// rebases itself on `now` and keeps the progress it had made.
    pub fn step(&mut self, now: f64) -> FaderStep {
        match self {
            Fader::Inactive => FaderStep::Idle,
            Fader::Lfo {
                base,
                amplitude,
                omega,
                start,
            } => {
                if *start > now {
                    *start = now;
                }
                let t = now - *start;
                FaderStep::Running(((t * *omega).sin() as f32) * *amplitude + *base)
            }
            Fader::Ramp {
                from,
                to,
                delta,
                current,
                duration,
                start,
                end,
            } => {
                if *duration <= 0.0 {
                    let target = *to;
                    *self = Fader::Inactive;
                    return FaderStep::Finished(target);
                }
                if *start > now {
                    let progress = if *delta != 0.0 {
                        (*current - *from) / *delta
                    } else {
                        0.0
                    };
                    *from = *current;
                    *start = now;
                    *duration *= 1.0 - progress as f64;
                    *delta = *to - *from;
                    *end = *start + *duration;
                }
                if now > *end {
                    let target = *to;
                    *self = Fader::Inactive;
                    return FaderStep::Finished(target);
                }
                *current = *from + *delta * ((now - *start) / *duration) as f32;
                FaderStep::Running(*current)
            }
        }
    }
}
