use crate::core::FXY;
use crate::errors::{Error, Result};
use nom::IResult;
use nom::bits::complete::take;

type BitInput<'a> = (&'a [u8], usize);

/// Decodes the 2 byte descriptor codes of section 3. A trailing odd byte
/// is padding and ignored.
pub(crate) fn parse_descriptors(input: &[u8]) -> Result<Vec<FXY>> {
    parse_descriptors_inner(input)
        .map(|(_, v)| v)
        .map_err(|_| Error::ParseError("Can't parse descriptors from section3".to_string()))
}

fn parse_descriptors_inner(mut input: &[u8]) -> IResult<BitInput<'_>, Vec<FXY>> {
    let mut results = Vec::with_capacity(input.len() / 2);
    while input.len() > 1 {
        let ((finput, _), fxy) = take_fxy((input, 0))?;
        results.push(fxy);
        input = finput;
    }

    Ok(((input, 0), results))
}

fn take_fxy(bit_input: BitInput) -> IResult<BitInput, FXY> {
    let (bit_input, f): (_, i32) = take(2usize)(bit_input)?;
    let (bit_input, x): (_, i32) = take(6usize)(bit_input)?;
    let (bit_input, y): (_, i32) = take(8usize)(bit_input)?;

    Ok((bit_input, FXY::new(f, x, y)))
}

pub(crate) fn encode_descriptors(descriptors: &[FXY], out: &mut Vec<u8>) {
    out.reserve(descriptors.len() * 2);
    for d in descriptors {
        out.extend_from_slice(&d.to_u16().to_be_bytes());
    }
}
