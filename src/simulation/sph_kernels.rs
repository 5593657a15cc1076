use crate::simulation::floating_type_mod::{FT, PI};

/**
 * Mass-scaled kernel factors of the 2d SPH fluid, precomputed once per
 * smoothing length.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphCoefficients {
    /// poly6: `m * 4 / (pi * h^8)`
    pub density: FT,
    /// spiky gradient: `m * -30 / (pi * h^5)`
    pub grad_pressure: FT,
    /// viscosity laplacian: `m * 20 / (3 * pi * h^5)`
    pub lap_viscosity: FT,
}

impl SphCoefficients {
    pub fn new(mass: FT, h: FT) -> Self {
        SphCoefficients {
            density: mass * poly6_norm_2d(h),
            grad_pressure: mass * -30. / (PI * h.powi(5)),
            lap_viscosity: mass * 20. / (3. * PI * h.powi(5)),
        }
    }
}

fn poly6_norm_2d(h: FT) -> FT {
    4. / (PI * h.powi(8))
}

/**
 * (h^2 - r^2)^3 for r^2 < h^2, zero outside. Takes the squared distance.
 */
pub fn poly6_unnormalized(r_sq: FT, h: FT) -> FT {
    let h_sq = h * h;
    if r_sq < h_sq {
        let d = h_sq - r_sq;
        d * d * d
    } else {
        0.
    }
}

/**
 * r is the distance to the center.
 * h is the support radius.
 */
pub fn poly6_kernel_2d(r: FT, h: FT) -> FT {
    poly6_norm_2d(h) * poly6_unnormalized(r * r, h)
}

/**
 * Pressure force contribution of neighbor j on i (without the mass-scaled
 * factor), `diff = x_j - x_i`.
 */
pub fn spiky_pressure_term(diff_len: FT, h: FT, avg_pressure: FT, density_j: FT) -> FT {
    let q = h - diff_len;
    avg_pressure / density_j * q * q / diff_len
}

pub fn viscosity_term(diff_len: FT, h: FT, density_j: FT) -> FT {
    (h - diff_len) / density_j
}

#[test]
fn poly6_kernel_2d_integration_test() {
    use crate::simulation::vec2f;

    let h = 0.5;
    let grid_size = 400;
    let square_len = 2. * h / grid_size as FT;
    let square_area = square_len * square_len;

    let mut integral = 0.;

    for y in 0..grid_size {
        for x in 0..grid_size {
            let integration_point = vec2f(
                (x as FT + 0.5) * square_len - h,
                (y as FT + 0.5) * square_len - h,
            );
            integral += poly6_kernel_2d(integration_point.norm(), h) * square_area;
        }
    }

    crate::simulation::assert_ft_approx_eq(integral, 1.0, 0.01, || "poly6 2d integral".to_string());
}

#[test]
fn coefficients_scale_with_mass() {
    let unit = SphCoefficients::new(1.0, 0.5);
    let heavy = SphCoefficients::new(0.08, 0.5);

    crate::simulation::assert_ft_approx_eq(heavy.density, unit.density * 0.08, 1e-3, || "density".into());
    assert!(heavy.grad_pressure < 0.);
    assert!(heavy.lap_viscosity > 0.);
    assert_eq!(poly6_unnormalized(0.25, 0.5), 0.);
    assert!(spiky_pressure_term(0.1, 0.5, 2.0, 1.0) > 0.);
}
