use nalgebra::Vector3;
use std::f64::consts::TAU;

use msf_core::quat_simp::wrap_angle;
use msf_core::QuatSimp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------
/// Truth integration step, 1 kHz.
pub const DT: f64 = 0.001;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct RobotParams {
    pub duration: f64,        // s
    pub forward_speed: f64,   // m/s, body x
    pub speed_amplitude: f64, // m/s, modulation of forward speed
    pub yaw_rate_amp: f64,    // rad/s
    pub yaw_rate_period: f64, // s, shared by speed and yaw-rate modulation
    pub climb_rate: f64,      // m/s, world z
    pub initial_position: Vector3<f64>,
    pub initial_yaw: f64, // rad
}

impl Default for RobotParams {
    fn default() -> Self {
        Self {
            duration: 60.0,
            forward_speed: 1.0,
            speed_amplitude: 0.2,
            yaw_rate_amp: 0.3,
            yaw_rate_period: 20.0,
            climb_rate: 0.0,
            initial_position: Vector3::zeros(),
            initial_yaw: 0.0,
        }
    }
}

impl RobotParams {
    fn forward_speed_at(&self, t: f64) -> f64 {
        if self.yaw_rate_period <= 0.0 {
            return self.forward_speed;
        }
        self.forward_speed + self.speed_amplitude * (TAU * t / self.yaw_rate_period).cos()
    }

    fn yaw_rate_at(&self, t: f64) -> f64 {
        if self.yaw_rate_period <= 0.0 {
            return 0.0;
        }
        self.yaw_rate_amp * (TAU * t / self.yaw_rate_period).sin()
    }
}

// ---------------------------------------------------------------------------
// Planar State
// ---------------------------------------------------------------------------
#[derive(Clone, Debug)]
struct State {
    t: f64,
    pos_w: Vector3<f64>,
    yaw: f64,
}

// ---------------------------------------------------------------------------
// Simulation Result
// ---------------------------------------------------------------------------
#[derive(Clone, Debug)]
pub struct SimResult {
    pub time: Vec<f64>,
    pub pos: Vec<Vector3<f64>>,
    pub yaw: Vec<f64>,
    pub vel_world: Vec<Vector3<f64>>,
    pub yaw_rate: Vec<f64>,
}

impl SimResult {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.time.last().copied().unwrap_or(0.0)
    }

    /// Index of the sample closest to `t`, clamped to the run.
    pub fn index_at(&self, t: f64) -> usize {
        let idx = (t / DT).round().max(0.0) as usize;
        idx.min(self.len().saturating_sub(1))
    }

    /// Body-frame linear velocity at sample `i`.
    pub fn vel_body(&self, i: usize) -> Vector3<f64> {
        QuatSimp::from_angle(self.yaw[i]).world_to_robot(&self.vel_world[i])
    }
}

// ---------------------------------------------------------------------------
// Kinematics
// ---------------------------------------------------------------------------
struct Derivative {
    d_pos: Vector3<f64>,
    d_yaw: f64,
}

fn calculate_derivative(s: &State, p: &RobotParams) -> Derivative {
    let v = p.forward_speed_at(s.t);
    let (sin, cos) = s.yaw.sin_cos();
    Derivative {
        d_pos: Vector3::new(v * cos, v * sin, p.climb_rate),
        d_yaw: p.yaw_rate_at(s.t),
    }
}

fn step_state(s: &State, d: &Derivative, dt: f64) -> State {
    State {
        t: s.t + dt,
        pos_w: s.pos_w + d.d_pos * dt,
        yaw: s.yaw + d.d_yaw * dt,
    }
}

// ---------------------------------------------------------------------------
// Main Loop
// ---------------------------------------------------------------------------
/// Integrate the planar robot truth at 1 kHz with RK4.
pub fn simulate_planar(p: &RobotParams) -> SimResult {
    let mut s = State {
        t: 0.0,
        pos_w: p.initial_position,
        yaw: p.initial_yaw,
    };
    let steps = (p.duration / DT).round().max(0.0) as usize + 1;

    let mut res = SimResult {
        time: Vec::with_capacity(steps),
        pos: Vec::with_capacity(steps),
        yaw: Vec::with_capacity(steps),
        vel_world: Vec::with_capacity(steps),
        yaw_rate: Vec::with_capacity(steps),
    };

    for _ in 0..steps {
        let k1 = calculate_derivative(&s, p);

        res.time.push(s.t);
        res.pos.push(s.pos_w);
        res.yaw.push(wrap_angle(s.yaw));
        res.vel_world.push(k1.d_pos);
        res.yaw_rate.push(k1.d_yaw);

        let k2 = calculate_derivative(&step_state(&s, &k1, DT * 0.5), p);
        let k3 = calculate_derivative(&step_state(&s, &k2, DT * 0.5), p);
        let k4 = calculate_derivative(&step_state(&s, &k3, DT), p);

        s.pos_w += (k1.d_pos + k2.d_pos * 2.0 + k3.d_pos * 2.0 + k4.d_pos) * (DT / 6.0);
        s.yaw += (k1.d_yaw + k2.d_yaw * 2.0 + k3.d_yaw * 2.0 + k4.d_yaw) * (DT / 6.0);
        s.t += DT;
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_line() {
        let p = RobotParams {
            duration: 10.0,
            speed_amplitude: 0.0,
            yaw_rate_amp: 0.0,
            climb_rate: 0.1,
            ..Default::default()
        };
        let res = simulate_planar(&p);
        assert_eq!(res.len(), 10_001);
        let last = res.pos.last().unwrap();
        assert_relative_eq!(last.x, 10.0, epsilon = 1e-6);
        assert_relative_eq!(last.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(last.z, 1.0, epsilon = 1e-6);
        assert!(res.yaw.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_yaw_integrates_rate() {
        let p = RobotParams::default();
        let res = simulate_planar(&p);
        // ∫ A·sin(2πt/T) dt is 0 over a full period, A·T/π over half.
        let i = res.index_at(p.yaw_rate_period);
        assert_relative_eq!(res.yaw[i], 0.0, epsilon = 1e-6);
        let half = res.index_at(p.yaw_rate_period / 2.0);
        let expected = p.yaw_rate_amp * p.yaw_rate_period / std::f64::consts::PI;
        assert_relative_eq!(res.yaw[half], expected, epsilon = 1e-6);
    }

    #[test]
    fn test_body_velocity_is_forward() {
        let p = RobotParams {
            duration: 5.0,
            ..Default::default()
        };
        let res = simulate_planar(&p);
        for i in (0..res.len()).step_by(500) {
            let vb = res.vel_body(i);
            assert_relative_eq!(vb.y, 0.0, epsilon = 1e-12);
            assert_relative_eq!(vb.x, p.forward_speed_at(res.time[i]), epsilon = 1e-12);
        }
    }
}
