use nom::{
    IResult,
    bytes::complete::take,
    error::{Error as NomError, ErrorKind},
    number::complete::{be_u8, be_u16, be_u24},
};

use super::{Identification, Section1, skip1};
use crate::errors::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};

/// Editions 2 and 3: 17 fixed octets, year of century, no seconds.
///
/// Edition 2 stores the originating centre on two octets, edition 3 splits
/// them into sub-centre and centre. A declared length of exactly 18 carries
/// one reserved octet; anything longer is local data. The reserved octet is
/// mandatory, so 17 is too short.
pub struct LegacyLayout;

impl Identification for LegacyLayout {
    const FIXED_LEN: usize = 17;

    fn parse(input: &[u8], edition: u8) -> IResult<&[u8], Section1> {
        let (input, length) = be_u24(input)?;
        let length = length as usize;
        if length <= Self::FIXED_LEN {
            return Err(nom::Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }

        let (input, master_table) = be_u8(input)?;
        let (input, centre, subcentre) = if edition == 2 {
            let (input, centre) = be_u16(input)?;
            (input, centre, 0)
        } else {
            let (input, subcentre) = be_u8(input)?;
            let (input, centre) = be_u8(input)?;
            (input, centre as u16, subcentre as u16)
        };
        let (input, update_sequence_number) = be_u8(input)?;
        let (input, flags) = be_u8(input)?;
        let (input, data_category) = be_u8(input)?;
        let (input, local_subcategory) = be_u8(input)?;
        let (input, master_table_version) = be_u8(input)?;
        let (input, local_table_version) = be_u8(input)?;
        let (input, year) = be_u8(input)?;
        let (input, month) = be_u8(input)?;
        let (input, day) = be_u8(input)?;
        let (input, hour) = be_u8(input)?;
        let (input, minute) = be_u8(input)?;

        let (input, local_use) = match length - Self::FIXED_LEN {
            1 => {
                let (input, _) = skip1(input)?;
                (input, Vec::new())
            }
            n => {
                let (input, bytes) = take(n)(input)?;
                (input, bytes.to_vec())
            }
        };

        Ok((
            input,
            Section1 {
                length,
                master_table,
                centre,
                subcentre,
                update_sequence_number,
                flags,
                data_category,
                international_data_subcategory: 0,
                local_subcategory,
                master_table_version,
                local_table_version,
                year: year as u16,
                month,
                day,
                hour,
                minute,
                second: 0,
                local_use,
            },
        ))
    }

    fn encode(section: &Section1, edition: u8, out: &mut Vec<u8>) -> Result<()> {
        out.write_u24::<BigEndian>(Self::length(section) as u32)?;
        out.write_u8(section.master_table)?;
        if edition == 2 {
            out.write_u16::<BigEndian>(section.centre)?;
        } else {
            out.write_u8(narrow(section.subcentre, "sub-centre")?)?;
            out.write_u8(narrow(section.centre, "centre")?)?;
        }
        out.write_u8(section.update_sequence_number)?;
        out.write_u8(section.flags)?;
        out.write_u8(section.data_category)?;
        out.write_u8(section.local_subcategory)?;
        out.write_u8(section.master_table_version)?;
        out.write_u8(section.local_table_version)?;
        out.write_u8(year_of_century(section.year))?;
        out.write_u8(section.month)?;
        out.write_u8(section.day)?;
        out.write_u8(section.hour)?;
        out.write_u8(section.minute)?;
        if section.local_use.is_empty() {
            out.write_u8(0)?;
        } else {
            out.extend_from_slice(&section.local_use);
        }
        Ok(())
    }

    fn length(section: &Section1) -> usize {
        Self::FIXED_LEN + section.local_use.len().max(1)
    }
}

/// Years past 255 are full years and are folded to 1..=100.
fn year_of_century(year: u16) -> u8 {
    if year > 255 {
        ((year - 1) % 100 + 1) as u8
    } else {
        year as u8
    }
}

fn narrow(value: u16, field: &str) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| Error::ParseError(format!("{} {} does not fit one octet", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_of_century() {
        assert_eq!(year_of_century(2000), 100);
        assert_eq!(year_of_century(2001), 1);
        assert_eq!(year_of_century(1999), 99);
        assert_eq!(year_of_century(87), 87);
    }

    #[test]
    fn test_local_data_kept_verbatim() {
        let mut raw = vec![0, 0, 21, 0, 7, 98, 0, 0x80, 1, 2, 13, 0, 99, 12, 31, 23, 59];
        raw.extend_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let (rest, s1) = LegacyLayout::parse(&raw, 3).unwrap();
        assert!(rest.is_empty());
        assert_eq!(s1.centre, 98);
        assert_eq!(s1.subcentre, 7);
        assert!(s1.optional_section_present());
        assert_eq!(s1.local_use, vec![0xAA, 0xBB, 0xCC, 0xDD]);

        let mut out = Vec::new();
        LegacyLayout::encode(&s1, 3, &mut out).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn test_short_length_rejected() {
        let raw = [0, 0, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(LegacyLayout::parse(&raw, 2).is_err());
    }

    #[test]
    fn test_missing_reserved_octet_rejected() {
        let raw = [0, 0, 17, 0, 7, 98, 0, 0, 1, 2, 13, 0, 99, 12, 31, 23, 59, 0];
        assert!(matches!(
            LegacyLayout::parse(&raw, 3),
            Err(nom::Err::Failure(e)) if e.code == ErrorKind::LengthValue
        ));
        let mut with_reserved = raw;
        with_reserved[2] = 18;
        let (rest, s1) = LegacyLayout::parse(&with_reserved, 3).unwrap();
        assert!(rest.is_empty());
        assert!(s1.local_use.is_empty());
    }

    #[test]
    fn test_wide_centre_rejected_for_edition3() {
        let section = Section1 {
            centre: 300,
            ..Default::default()
        };
        let mut out = Vec::new();
        assert!(LegacyLayout::encode(&section, 3, &mut out).is_err());
        out.clear();
        assert!(LegacyLayout::encode(&section, 2, &mut out).is_ok());
        assert_eq!(out.len(), 18);
    }
}
