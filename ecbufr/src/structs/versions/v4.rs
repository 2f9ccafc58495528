use nom::{
    IResult,
    bytes::complete::take,
    error::{Error as NomError, ErrorKind},
    number::complete::{be_u8, be_u16, be_u24},
};

use super::{Identification, Section1};
use crate::errors::Result;
use byteorder::{BigEndian, WriteBytesExt};

/// Edition 4: 22 fixed octets with two octet centres and a four digit year.
pub struct CurrentLayout;

impl Identification for CurrentLayout {
    const FIXED_LEN: usize = 22;

    fn parse(input: &[u8], _edition: u8) -> IResult<&[u8], Section1> {
        let (input, length_u24) = be_u24(input)?;
        let length = length_u24 as usize;
        if length < Self::FIXED_LEN {
            return Err(nom::Err::Failure(NomError::new(input, ErrorKind::LengthValue)));
        }

        let (input, master_table) = be_u8(input)?;
        let (input, centre) = be_u16(input)?;
        let (input, subcentre) = be_u16(input)?;
        let (input, update_sequence_number) = be_u8(input)?;
        let (input, flags) = be_u8(input)?;
        let (input, data_category) = be_u8(input)?;
        let (input, international_data_subcategory) = be_u8(input)?;
        let (input, local_subcategory) = be_u8(input)?;
        let (input, master_table_version) = be_u8(input)?;
        let (input, local_table_version) = be_u8(input)?;
        let (input, year) = be_u16(input)?;
        let (input, month) = be_u8(input)?;
        let (input, day) = be_u8(input)?;
        let (input, hour) = be_u8(input)?;
        let (input, minute) = be_u8(input)?;
        let (input, second) = be_u8(input)?;

        let (input, local_bytes) = take(length - Self::FIXED_LEN)(input)?;

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
                international_data_subcategory,
                local_subcategory,
                master_table_version,
                local_table_version,
                year,
                month,
                day,
                hour,
                minute,
                second,
                local_use: local_bytes.to_vec(),
            },
        ))
    }

    fn encode(section: &Section1, _edition: u8, out: &mut Vec<u8>) -> Result<()> {
        out.write_u24::<BigEndian>(Self::length(section) as u32)?;
        out.write_u8(section.master_table)?;
        out.write_u16::<BigEndian>(section.centre)?;
        out.write_u16::<BigEndian>(section.subcentre)?;
        out.write_u8(section.update_sequence_number)?;
        out.write_u8(section.flags)?;
        out.write_u8(section.data_category)?;
        out.write_u8(section.international_data_subcategory)?;
        out.write_u8(section.local_subcategory)?;
        out.write_u8(section.master_table_version)?;
        out.write_u8(section.local_table_version)?;
        out.write_u16::<BigEndian>(section.year)?;
        out.write_u8(section.month)?;
        out.write_u8(section.day)?;
        out.write_u8(section.hour)?;
        out.write_u8(section.minute)?;
        out.write_u8(section.second)?;
        out.extend_from_slice(&section.local_use);
        Ok(())
    }

    fn length(section: &Section1) -> usize {
        Self::FIXED_LEN + section.local_use.len()
    }
}
