//! Repairs multipoint well-known text written without per-point parentheses.
//!
//! Some encoders (DuckDB spatial among them) write `MULTIPOINT (1 2, 3 4)` where the
//! grammar expects `MULTIPOINT ((1 2), (3 4))`. Geometry collections holding such
//! multipoints are not rewritten.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref MULTIPOINT_TAG: Regex =
        Regex::new(r"(?i)^\s*MULTIPOINT\s*(?:ZM|Z|M)?\s*\(").unwrap();
    static ref BARE_POINT: Regex = Regex::new(
        r"^[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?(?:\s+[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?){1,3}$"
    )
    .unwrap();
}

/// Wraps every bare coordinate of a multipoint in parentheses.
///
/// Points that are already parenthesized are left alone, so the repair is idempotent.
/// Anything that is not a multipoint is returned unchanged.
pub fn repair_multipoint(wkt: &str) -> Cow<'_, str> {
    let start = match MULTIPOINT_TAG.find(wkt) {
        Some(tag) => tag.end(),
        None => return Cow::Borrowed(wkt),
    };
    let end = match wkt.rfind(')') {
        Some(end) if end >= start => end,
        _ => return Cow::Borrowed(wkt),
    };

    let mut repaired = false;
    let points: Vec<Cow<'_, str>> = wkt[start..end]
        .split(',')
        .map(|point| {
            let trimmed = point.trim();
            if BARE_POINT.is_match(trimmed) {
                repaired = true;
                let leading = &point[..point.len() - point.trim_start().len()];
                let trailing = &point[point.trim_end().len()..];
                Cow::Owned(format!("{}({}){}", leading, trimmed, trailing))
            } else {
                Cow::Borrowed(point)
            }
        })
        .collect();

    if !repaired {
        return Cow::Borrowed(wkt);
    }

    Cow::Owned(format!("{}{}{}", &wkt[..start], points.join(","), &wkt[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_single_bare_point() {
        assert_eq!(
            repair_multipoint("MULTIPOINT (-122.388749 37.620113)"),
            "MULTIPOINT ((-122.388749 37.620113))"
        );
    }

    #[test]
    fn wraps_every_bare_point() {
        assert_eq!(
            repair_multipoint("MULTIPOINT (-122.3931 37.618206, -122.388749 37.620113)"),
            "MULTIPOINT ((-122.3931 37.618206), (-122.388749 37.620113))"
        );
    }

    #[test]
    fn leaves_parenthesized_points_alone() {
        let wkt = "MULTIPOINT((-122.3931 37.618206), (-122.388749 37.620113))";
        let repaired = repair_multipoint(wkt);
        assert_eq!(repaired, wkt);
        assert!(matches!(repaired, Cow::Borrowed(_)));
    }

    #[test]
    fn repairs_mixed_points() {
        assert_eq!(
            repair_multipoint("MULTIPOINT ((1 2), 3 4)"),
            "MULTIPOINT ((1 2), (3 4))"
        );
    }

    #[test]
    fn keeps_surrounding_whitespace() {
        assert_eq!(
            repair_multipoint("MULTIPOINT (1 2 , 3 4 )"),
            "MULTIPOINT ((1 2) , (3 4) )"
        );
        assert_eq!(
            repair_multipoint("MULTIPOINT (  1 2,\t3 4)"),
            "MULTIPOINT (  (1 2),\t(3 4))"
        );
    }

    #[test]
    fn handles_dimensions_and_exponents() {
        assert_eq!(
            repair_multipoint("MULTIPOINT Z (1 2 3, 4 5 6)"),
            "MULTIPOINT Z ((1 2 3), (4 5 6))"
        );
        assert_eq!(
            repair_multipoint("MULTIPOINT (1e-3 -2.5E2)"),
            "MULTIPOINT ((1e-3 -2.5E2))"
        );
    }

    #[test]
    fn is_idempotent() {
        for wkt in [
            "MULTIPOINT (-122.388749 37.620113)",
            "MULTIPOINT (1 2, 3 4, 5 6)",
            "MULTIPOINT ((1 2), 3 4)",
            "MULTIPOINT EMPTY",
            "POINT (1 2)",
        ] {
            let once = repair_multipoint(wkt).into_owned();
            let twice = repair_multipoint(&once).into_owned();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn passes_through_other_geometries() {
        for wkt in [
            "POINT (-122.388749 37.620113)",
            "LINESTRING (0 0, 1 1)",
            "POLYGON ((0 0, 1 0, 1 1, 0 0))",
            "MULTIPOINT EMPTY",
            // nested multipoints are a known gap
            "GEOMETRYCOLLECTION (MULTIPOINT (1 2, 3 4))",
        ] {
            assert!(matches!(repair_multipoint(wkt), Cow::Borrowed(_)), "{}", wkt);
        }
    }
}
