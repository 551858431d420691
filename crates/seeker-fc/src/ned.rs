//! ENU/FLU (what the guidance core works in) <-> NED/FRD (what MAVLink
//! local-frame messages carry).

use std::f64::consts::{FRAC_PI_2, PI, TAU};

use seeker_proto::{Quaternion, Vec3};

/// Wrap an angle into (-pi, pi].
pub fn wrap_pi(a: f64) -> f64 {
    let mut w = (a + PI).rem_euclid(TAU) - PI;
    if w <= -PI {
        w += TAU;
    }
    w
}

/// Position or velocity: swap x/y, flip z. Its own inverse.
pub fn swap_frame(v: Vec3) -> Vec3 {
    Vec3::new(v.y, v.x, -v.z)
}

pub fn ned_to_enu(x: f32, y: f32, z: f32) -> Vec3 {
    swap_frame(Vec3::new(x as f64, y as f64, z as f64))
}

pub fn enu_to_ned(v: Vec3) -> [f32; 3] {
    let n = swap_frame(v);
    [n.x as f32, n.y as f32, n.z as f32]
}

/// Heading conversion; also maps NED back to ENU.
pub fn yaw_enu_to_ned(yaw: f64) -> f64 {
    wrap_pi(FRAC_PI_2 - yaw)
}

/// Vehicle attitude, NED/FRD -> ENU/FLU.
pub fn attitude_ned_to_enu(q: Quaternion) -> Quaternion {
    let (roll, pitch, yaw) = q.to_euler();
    Quaternion::from_euler(roll, -pitch, yaw_enu_to_ned(yaw))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn wraps_into_half_open_interval() {
        assert!((wrap_pi(2.5 * PI) - FRAC_PI_2).abs() < 1e-12);
        assert!((wrap_pi(-PI) - PI).abs() < EPS);
        assert!((wrap_pi(0.5) - 0.5).abs() < EPS);
        assert!((wrap_pi(-TAU - 0.5) + 0.5).abs() < EPS);
    }

    #[test]
    fn position_swap_round_trips() {
        let enu = Vec3::new(1.0, 2.0, 3.0);
        let [n, e, d] = enu_to_ned(enu);
        assert_eq!((n, e, d), (2.0, 1.0, -3.0));
        assert_eq!(ned_to_enu(n, e, d), enu);
    }

    #[test]
    fn north_heading() {
        // facing north: ENU yaw +90deg, NED yaw 0
        assert!(yaw_enu_to_ned(FRAC_PI_2).abs() < EPS);
        assert!((yaw_enu_to_ned(0.0) - FRAC_PI_2).abs() < EPS);
    }

    #[test]
    fn level_east_facing_attitude() {
        // NED yaw 90deg (east) -> ENU yaw 0
        let q_ned = Quaternion::from_euler(0.0, 0.0, FRAC_PI_2);
        let q_enu = attitude_ned_to_enu(q_ned);
        assert!(q_enu.same_rotation(&Quaternion::IDENTITY, 1e-9));
    }

    #[test]
    fn pitch_up_flips_sign() {
        let q_ned = Quaternion::from_euler(0.1, 0.2, 0.0);
        let (r, p, y) = attitude_ned_to_enu(q_ned).to_euler();
        assert!((r - 0.1).abs() < 1e-9);
        assert!((p + 0.2).abs() < 1e-9);
        assert!((y - FRAC_PI_2).abs() < 1e-9);
    }
}
