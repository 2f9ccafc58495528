use nom::{IResult, bytes::complete::take};
pub mod bit;
pub(crate) mod tools;
pub mod versions;

/// Largest message the 3 byte length of section 0 can describe.
pub const MAX_MESSAGE_LEN: usize = 16_777_216;

#[inline]
pub fn skip(n: usize) -> impl Fn(&[u8]) -> IResult<&[u8], ()> {
    move |input: &[u8]| {
        let (input, _) = take(n)(input)?;
        Ok((input, ()))
    }
}

#[inline]
pub fn skip1(input: &[u8]) -> IResult<&[u8], ()> {
    skip(1)(input)
}
