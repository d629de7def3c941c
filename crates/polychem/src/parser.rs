use nom::{
    IResult,
    character::complete::satisfy,
    combinator::{all_consuming, recognize},
    multi::{many0_count, many1},
    sequence::pair,
};

use crate::{PolychemError, Result};

/// Splits a peptide sequence like `PEPMoxTIDEK` into its residue abbreviations
pub fn residue_abbrs(sequence: &str) -> Result<Vec<&str>> {
    all_consuming(peptide)(sequence)
        .map(|(_, abbrs)| abbrs)
        .map_err(|e| {
            let rest = match e {
                nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
                nom::Err::Incomplete(_) => "",
            };
            Box::new(PolychemError::sequence(sequence, sequence.len() - rest.len()))
        })
}

/// Peptide = Residue , { Residue } ;
fn peptide(i: &str) -> IResult<&str, Vec<&str>> {
    many1(residue)(i)
}

/// Residue = uppercase , { lowercase | digit } ;
fn residue(i: &str) -> IResult<&str, &str> {
    let modification = satisfy(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    recognize(pair(satisfy(|c| c.is_ascii_uppercase()), many0_count(modification)))(i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residue() {
        assert_eq!(residue("K"), Ok(("", "K")));
        assert_eq!(residue("Mox"), Ok(("", "Mox")));
        assert_eq!(residue("Kbs3oh"), Ok(("", "Kbs3oh")));
        // Only a single residue is consumed
        assert_eq!(residue("MoxK"), Ok(("K", "Mox")));
        assert_eq!(residue("KR"), Ok(("R", "K")));
        // Modifications can't stand on their own
        assert!(residue("ox").is_err());
        assert!(residue("3").is_err());
        assert!(residue("").is_err());
    }

    #[test]
    fn test_residue_abbrs() {
        assert_eq!(
            residue_abbrs("PEPMoxTIDEK").unwrap(),
            ["P", "E", "P", "Mox", "T", "I", "D", "E", "K"]
        );
        assert_eq!(residue_abbrs("G").unwrap(), ["G"]);

        let PolychemError::Sequence { span, .. } = *residue_abbrs("PEP-TIDE").unwrap_err() else {
            panic!("expected a sequence error");
        };
        assert_eq!(span.offset(), 3);

        let PolychemError::Sequence { span, .. } = *residue_abbrs("oxM").unwrap_err() else {
            panic!("expected a sequence error");
        };
        assert_eq!(span.offset(), 0);

        assert!(residue_abbrs("").is_err());
    }
}
