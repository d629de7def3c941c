// Standard Library Imports
use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

// External Crate Imports
use nom::{
    IResult,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::multispace0,
    combinator::{all_consuming, value},
    number::complete::double,
    sequence::{delimited, separated_pair},
};

// Local Crate Imports
use crate::{Result, SifterError};

// Public API ==========================================================================================================

/// An allowed mass measurement error, either relative (in parts-per-million) or absolute (in Daltons)
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Tolerance {
    Ppm(f64),
    Da(f64),
}

impl Tolerance {
    /// The window of masses within tolerance of `value`
    #[must_use]
    pub fn bounds(&self, value: f64) -> (f64, f64) {
        self.bounds_relative_to(value, value)
    }

    /// A window around `value` sized as if it were a window around `reference`
    ///
    /// This matters for relative tolerances when `value` is derived from a larger measured mass, like the mass of a
    /// beta peptide derived from the precursor mass
    #[must_use]
    pub fn bounds_relative_to(&self, value: f64, reference: f64) -> (f64, f64) {
        let delta = self.delta(reference);
        (value - delta, value + delta)
    }

    /// The largest mass still within tolerance of `value`
    #[must_use]
    pub fn max(&self, value: f64) -> f64 {
        self.bounds(value).1
    }

    /// Orders two masses, treating any pair within tolerance of the larger one as equal
    #[must_use]
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        let tolerance = self.delta(a.abs().max(b.abs()));
        if a + tolerance < b {
            Ordering::Less
        } else if a - tolerance > b {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    #[must_use]
    pub fn matches(&self, a: f64, b: f64) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    /// The error of `observed` from `theoretical`, in the units of this tolerance
    #[must_use]
    pub fn error(&self, theoretical: f64, observed: f64) -> f64 {
        match self {
            Self::Ppm(_) => (observed - theoretical) / theoretical * 1e6,
            Self::Da(_) => observed - theoretical,
        }
    }

    #[must_use]
    pub const fn is_relative(&self) -> bool {
        matches!(self, Self::Ppm(_))
    }

    /// The number of decimal places absolute-tolerance masses are rounded to before being used as index keys
    ///
    /// Relative tolerances (and a zero tolerance) aren't quantized
    #[must_use]
    pub fn decimal_places(&self) -> Option<i32> {
        match *self {
            Self::Da(delta) if delta > 0.0 => {
                let places = (-delta.log10()).ceil() as i32 + 2;
                Some(places.clamp(0, 10))
            }
            _ => None,
        }
    }

    /// The spacing between quantized masses
    #[must_use]
    pub fn quantization_step(&self) -> Option<f64> {
        self.decimal_places().map(|places| 10f64.powi(-places))
    }

    #[must_use]
    pub fn quantize(&self, mass: f64) -> f64 {
        self.decimal_places().map_or(mass, |places| {
            let factor = 10f64.powi(places);
            (mass * factor).round() / factor
        })
    }
}

impl Tolerance {
    fn delta(&self, reference: f64) -> f64 {
        match *self {
            Self::Ppm(ppm) => reference.abs() * ppm.abs() * 1e-6,
            Self::Da(delta) => delta.abs(),
        }
    }
}

impl FromStr for Tolerance {
    type Err = Box<SifterError>;

    fn from_str(s: &str) -> Result<Self> {
        let (_, tolerance) =
            all_consuming(tolerance)(s).map_err(|_| Box::new(SifterError::tolerance(s)))?;
        match tolerance {
            Self::Ppm(value) | Self::Da(value) if value < 0.0 => {
                Err(Box::new(SifterError::negative_tolerance(s)))
            }
            tolerance => Ok(tolerance),
        }
    }
}

impl Display for Tolerance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ppm(ppm) => write!(f, "{ppm}ppm"),
            Self::Da(delta) => write!(f, "{delta}da"),
        }
    }
}

// Tolerance Parser ====================================================================================================

#[derive(Copy, Clone)]
enum Unit {
    Ppm,
    Da,
}

/// Tolerance = [ whitespace ] , number , [ whitespace ] , unit , [ whitespace ] ;
/// unit = "ppm" | "da" ; (case-insensitive)
fn tolerance(i: &str) -> IResult<&str, Tolerance> {
    let unit = alt((
        value(Unit::Ppm, tag_no_case("ppm")),
        value(Unit::Da, tag_no_case("da")),
    ));
    let (rest, (number, unit)) =
        delimited(multispace0, separated_pair(double, multispace0, unit), multispace0)(i)?;
    let tolerance = match unit {
        Unit::Ppm => Tolerance::Ppm(number),
        Unit::Da => Tolerance::Da(number),
    };
    Ok((rest, tolerance))
}

// Module Tests ========================================================================================================

#[cfg(test)]
mod tests {
    use assert_float_eq::assert_float_absolute_eq;

    use super::*;

    #[test]
    fn parse_tolerances() {
        assert_eq!("10ppm".parse(), Ok(Tolerance::Ppm(10.0)));
        assert_eq!("0.02da".parse(), Ok(Tolerance::Da(0.02)));
        assert_eq!(" 6 PPM ".parse(), Ok(Tolerance::Ppm(6.0)));
        assert_eq!("0.5Da".parse(), Ok(Tolerance::Da(0.5)));
        assert_eq!("0ppm".parse(), Ok(Tolerance::Ppm(0.0)));
    }

    #[test]
    fn parse_invalid_tolerances() {
        let parse = |s: &str| s.parse::<Tolerance>().unwrap_err();
        assert_eq!(*parse("10"), SifterError::Tolerance { input: "10".into() });
        assert_eq!(*parse("ppm"), SifterError::Tolerance { input: "ppm".into() });
        assert_eq!(*parse("10 ppm!"), SifterError::Tolerance { input: "10 ppm!".into() });
        assert_eq!(*parse("10mmu"), SifterError::Tolerance { input: "10mmu".into() });
        assert_eq!(
            *parse("-10ppm"),
            SifterError::NegativeTolerance {
                input: "-10ppm".into()
            }
        );
    }

    #[test]
    fn display_round_trips() {
        for tolerance in [Tolerance::Ppm(6.0), Tolerance::Da(0.02)] {
            assert_eq!(tolerance.to_string().parse(), Ok(tolerance));
        }
    }

    #[test]
    fn ppm_bounds() {
        let (min, max) = Tolerance::Ppm(7.5).bounds(941.407_703);
        assert_float_absolute_eq!(min, 941.400_642, 1e-6);
        assert_float_absolute_eq!(max, 941.414_764, 1e-6);

        // A relative window can be sized from a different, larger mass
        let (min, max) = Tolerance::Ppm(10.0).bounds_relative_to(500.0, 2000.0);
        assert_float_absolute_eq!(min, 499.98);
        assert_float_absolute_eq!(max, 500.02);
    }

    #[test]
    fn da_bounds() {
        let (min, max) = Tolerance::Da(0.02).bounds(500.0);
        assert_float_absolute_eq!(min, 499.98);
        assert_float_absolute_eq!(max, 500.02);
        assert_eq!(
            Tolerance::Da(0.02).bounds_relative_to(500.0, 2000.0),
            Tolerance::Da(0.02).bounds(500.0)
        );
    }

    #[test]
    fn bounds_always_contain_the_value() {
        let tolerances = [
            Tolerance::Ppm(0.0),
            Tolerance::Ppm(10.0),
            Tolerance::Da(0.0),
            Tolerance::Da(0.5),
        ];
        for tolerance in tolerances {
            for value in [0.0, 1e-9, 57.021, 1000.0, 1.0e7] {
                let (min, max) = tolerance.bounds(value);
                assert!(min <= value && value <= max, "{tolerance}: {min} <= {value} <= {max}");
                assert_eq!(tolerance.compare(value, value), Ordering::Equal);
            }
        }
    }

    #[test]
    fn compare_masses() {
        let ppm = Tolerance::Ppm(10.0);
        assert_eq!(ppm.compare(1000.0, 1000.009), Ordering::Equal);
        assert_eq!(ppm.compare(1000.0, 1000.011), Ordering::Less);
        assert_eq!(ppm.compare(1000.011, 1000.0), Ordering::Greater);
        assert!(ppm.matches(1000.0, 999.991));

        let da = Tolerance::Da(0.5);
        assert_eq!(da.compare(100.0, 100.4), Ordering::Equal);
        assert_eq!(da.compare(100.0, 100.6), Ordering::Less);
        assert_eq!(da.compare(100.6, 100.0), Ordering::Greater);
    }

    #[test]
    fn mass_errors() {
        assert_float_absolute_eq!(Tolerance::Ppm(10.0).error(1000.0, 1000.005), 5.0, 1e-6);
        assert_float_absolute_eq!(Tolerance::Da(0.1).error(1000.0, 1000.005), 0.005, 1e-9);
    }

    #[test]
    fn quantization() {
        assert_eq!(Tolerance::Ppm(10.0).decimal_places(), None);
        assert_eq!(Tolerance::Da(0.0).decimal_places(), None);
        assert_eq!(Tolerance::Da(0.02).decimal_places(), Some(4));
        assert_eq!(Tolerance::Da(0.5).decimal_places(), Some(3));
        assert_eq!(Tolerance::Da(5.0).decimal_places(), Some(2));
        assert_eq!(Tolerance::Da(1e-12).decimal_places(), Some(10));
        assert_eq!(Tolerance::Da(1e6).decimal_places(), Some(0));

        assert_float_absolute_eq!(Tolerance::Da(0.02).quantize(1234.567_891), 1234.5679, 1e-9);
        assert_float_absolute_eq!(Tolerance::Da(0.02).quantization_step().unwrap(), 1e-4, 1e-15);
        assert_eq!(Tolerance::Ppm(10.0).quantize(1234.567_891), 1234.567_891);
    }
}
