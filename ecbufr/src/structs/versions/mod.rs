pub mod v2;
pub mod v4;

pub(super) use super::{skip, skip1};
use super::MAX_MESSAGE_LEN;
use super::bit::BitBuffer;
use super::tools::{encode_descriptors, parse_descriptors};
use crate::core::FXY;
use crate::errors::{Error, Result};
use byteorder::{BigEndian, WriteBytesExt};
use nom::{
    IResult,
    bytes::complete::{tag, take},
    error::ErrorKind,
    number::complete::{be_u8, be_u16, be_u24},
};
use serde::Serialize;

/// Identification section layout of one or more editions.
pub trait Identification {
    /// Octets of the fixed part, length field included.
    const FIXED_LEN: usize;

    fn parse(input: &[u8], edition: u8) -> IResult<&[u8], Section1>;

    fn encode(section: &Section1, edition: u8, out: &mut Vec<u8>) -> Result<()>;

    fn length(section: &Section1) -> usize;
}

macro_rules! editions {
    ($(($layout:ty, $($edition:literal)|+)),+ $(,)?) => {
        pub const SUPPORTED_EDITIONS: &[u8] = &[$($($edition,)+)+];

        fn parse_identification(input: &[u8], edition: u8) -> IResult<&[u8], Section1> {
            match edition {
                $(
                    $($edition)|+ => <$layout as Identification>::parse(input, edition),
                )+
                _ => Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Tag))),
            }
        }

        fn encode_identification(section: &Section1, edition: u8, out: &mut Vec<u8>) -> Result<()> {
            match edition {
                $(
                    $($edition)|+ => <$layout as Identification>::encode(section, edition, out),
                )+
                _ => Err(Error::UnsupportedVersion(edition)),
            }
        }

        fn identification_length(section: &Section1, edition: u8) -> usize {
            match edition {
                $(
                    $($edition)|+ => <$layout as Identification>::length(section),
                )+
                _ => 0,
            }
        }
    };
}

editions!((v2::LegacyLayout, 2 | 3), (v4::CurrentLayout, 4));

pub fn is_supported_edition(edition: u8) -> bool {
    SUPPORTED_EDITIONS.contains(&edition)
}

/// Which tables a message was encoded against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableInfo {
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub center_id: u16,
    pub subcenter_id: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Section1 {
    /// Declared length as read, or as computed by the last `end_message`.
    pub length: usize,
    pub master_table: u8,
    pub centre: u16,
    pub subcentre: u16,
    pub update_sequence_number: u8,
    pub flags: u8,
    pub data_category: u8,
    pub international_data_subcategory: u8,
    pub local_subcategory: u8,
    pub master_table_version: u8,
    pub local_table_version: u8,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Octets past the fixed layout, kept verbatim.
    pub local_use: Vec<u8>,
}

impl Section1 {
    pub const OPTIONAL_SECTION: u8 = 0x80;

    pub fn optional_section_present(&self) -> bool {
        self.flags & Self::OPTIONAL_SECTION != 0
    }

    pub fn set_optional_section(&mut self, present: bool) {
        if present {
            self.flags |= Self::OPTIONAL_SECTION;
        } else {
            self.flags &= !Self::OPTIONAL_SECTION;
        }
    }
}

impl std::fmt::Display for Section1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Section 1:")?;
        writeln!(f, "  Length: {} bytes", self.length)?;
        writeln!(f)?;
        writeln!(f, "  Organization:")?;
        writeln!(
            f,
            "    Centre:              {:<5} (0x{:04X})",
            self.centre, self.centre
        )?;
        writeln!(
            f,
            "    Sub-centre:          {:<5} (0x{:04X})",
            self.subcentre, self.subcentre
        )?;
        writeln!(
            f,
            "    Update Sequence:     {}",
            self.update_sequence_number
        )?;
        writeln!(f)?;
        writeln!(f, "  Data Classification:")?;
        writeln!(f, "    Category:            {}", self.data_category)?;
        writeln!(
            f,
            "    International Sub:   {}",
            self.international_data_subcategory
        )?;
        writeln!(f, "    Local Sub:           {}", self.local_subcategory)?;
        writeln!(f)?;
        writeln!(f, "  Table Versions:")?;
        writeln!(
            f,
            "    Master Table:        {} (v{})",
            self.master_table, self.master_table_version
        )?;
        writeln!(f, "    Local Table:         v{}", self.local_table_version)?;
        writeln!(f)?;
        writeln!(f, "  Observation Time:")?;
        writeln!(
            f,
            "    DateTime:            {:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        writeln!(f)?;
        writeln!(f, "  Optional Data:")?;
        writeln!(
            f,
            "    Section 2 Present:   {}",
            if self.optional_section_present() {
                "Yes"
            } else {
                "No"
            }
        )?;
        write!(f, "    Local Use Data:      {} bytes", self.local_use.len())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section2 {
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section3 {
    pub number_of_subsets: u16,
    pub flags: u8,
    pub descriptors: Vec<FXY>,
}

impl Section3 {
    pub const OBSERVED: u8 = 0x80;
    pub const COMPRESSED: u8 = 0x40;

    pub fn is_observation(&self) -> bool {
        self.flags & Self::OBSERVED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & Self::COMPRESSED != 0
    }

    pub fn set_observation(&mut self, observed: bool) {
        self.set_flag(Self::OBSERVED, observed);
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        self.set_flag(Self::COMPRESSED, compressed);
    }

    fn set_flag(&mut self, bit: u8, on: bool) {
        if on {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section4 {
    pub payload: BitBuffer,
}

/// Byte length of every section of an encoded message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionLengths {
    pub section0: usize,
    pub section1: usize,
    pub section2: usize,
    pub section3: usize,
    pub section4: usize,
    pub section5: usize,
}

impl SectionLengths {
    pub fn total(&self) -> usize {
        self.section0 + self.section1 + self.section2 + self.section3 + self.section4 + self.section5
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BUFRMessage {
    /// Bytes that preceded the start marker in the stream.
    pub header: Vec<u8>,
    edition: u8,
    pub section1: Section1,
    pub section2: Option<Section2>,
    pub section3: Section3,
    pub section4: Section4,
}

impl BUFRMessage {
    pub fn new(edition: u8) -> Result<Self> {
        if !is_supported_edition(edition) {
            return Err(Error::UnsupportedVersion(edition));
        }
        let mut msg = BUFRMessage {
            header: Vec::new(),
            edition,
            section1: Section1::default(),
            section2: None,
            section3: Section3::default(),
            section4: Section4::default(),
        };
        msg.section1.length = identification_length(&msg.section1, edition);
        Ok(msg)
    }

    /// Parses one message from `input`, which must start at the `BUFR` marker.
    pub fn parse(input: &[u8]) -> Result<Self> {
        let (rest, section0) = section(0, parse_section0(input))?;
        if !is_supported_edition(section0.version) {
            return Err(Error::UnsupportedVersion(section0.version));
        }
        let edition = section0.version;

        let (rest, section1) = section(1, parse_identification(rest, edition))?;
        let (rest, section2) = if section1.optional_section_present() {
            let (rest, data) = section(2, parse_section2(rest))?;
            (rest, Some(Section2 { data }))
        } else {
            (rest, None)
        };
        let (rest, raw3) = section(3, parse_section3(rest))?;
        let (rest, payload) = section(4, parse_section4(rest))?;
        let (rest, end) = section(5, take(4usize)(rest))?;
        if end != b"7777" {
            let mut marker = [0u8; 4];
            marker.copy_from_slice(end);
            return Err(Error::BadTerminator(marker));
        }

        let consumed = input.len() - rest.len();
        if consumed != section0.total_length as usize {
            return Err(Error::LengthMismatch {
                declared: section0.total_length as usize,
                actual: consumed,
            });
        }

        Ok(BUFRMessage {
            header: Vec::new(),
            edition,
            section1,
            section2,
            section3: Section3 {
                number_of_subsets: raw3.number_of_subsets,
                flags: raw3.flags,
                descriptors: parse_descriptors(raw3.data)?,
            },
            section4: Section4 {
                payload: BitBuffer::from_bytes(payload.to_vec()),
            },
        })
    }

    pub fn edition(&self) -> u8 {
        self.edition
    }

    pub fn table_info(&self) -> TableInfo {
        TableInfo {
            master_table_version: self.section1.master_table_version,
            local_table_version: self.section1.local_table_version,
            center_id: self.section1.centre,
            subcenter_id: self.section1.subcentre,
        }
    }

    pub fn subsets_count(&self) -> u16 {
        self.section3.number_of_subsets
    }

    pub fn is_compressed(&self) -> bool {
        self.section3.is_compressed()
    }

    pub fn descriptors(&self) -> &[FXY] {
        &self.section3.descriptors
    }

    pub fn set_descriptors(&mut self, descriptors: Vec<FXY>) {
        self.section3.descriptors = descriptors;
    }

    pub fn payload(&self) -> &BitBuffer {
        &self.section4.payload
    }

    pub fn payload_mut(&mut self) -> &mut BitBuffer {
        &mut self.section4.payload
    }

    /// Stores opaque local data. Editions before 4 pad it to an even length.
    pub fn set_section2(&mut self, data: &[u8]) {
        let mut data = data.to_vec();
        if self.edition <= 3 && data.len() % 2 == 1 {
            data.push(0);
        }
        self.section2 = Some(Section2 { data });
        self.section1.set_optional_section(true);
    }

    pub fn clear_section2(&mut self) {
        self.section2 = None;
        self.section1.set_optional_section(false);
    }

    pub fn set_time(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) {
        let s1 = &mut self.section1;
        s1.year = year;
        s1.month = month;
        s1.day = day;
        s1.hour = hour;
        s1.minute = minute;
        s1.second = second;
    }

    /// Resets the data description and payload before packing new data.
    pub fn begin_message(&mut self) {
        self.section3.descriptors.clear();
        self.section4.payload.clear();
    }

    /// Settles flags, padding and section 1 length once the payload is
    /// fully packed.
    pub fn end_message(&mut self) -> Result<()> {
        self.section1.set_optional_section(self.section2.is_some());
        if self.edition <= 3 {
            let payload = &mut self.section4.payload;
            payload.align()?;
            if (4 + payload.filled()) % 2 == 1 {
                payload.put_bits(0, 8)?;
            }
        }
        self.section1.length = identification_length(&self.section1, self.edition);
        Ok(())
    }

    pub fn section_lengths(&self) -> SectionLengths {
        let mut section3 = 7 + 2 * self.section3.descriptors.len();
        if self.edition <= 3 && section3 % 2 == 1 {
            section3 += 1;
        }
        SectionLengths {
            section0: 8,
            section1: identification_length(&self.section1, self.edition),
            section2: self.section2.as_ref().map_or(0, |s| 4 + s.data.len()),
            section3,
            section4: 4 + self.section4.payload.filled(),
            section5: 4,
        }
    }

    pub fn total_length(&self) -> usize {
        self.section_lengths().total()
    }

    /// Encodes the message from the start marker through `7777`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let lengths = self.section_lengths();
        let total = lengths.total();
        if total > MAX_MESSAGE_LEN {
            return Err(Error::MessageTooLong(total));
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"BUFR");
        out.write_u24::<BigEndian>(total as u32)?;
        out.write_u8(self.edition)?;

        let mut section1 = self.section1.clone();
        section1.set_optional_section(self.section2.is_some());
        encode_identification(&section1, self.edition, &mut out)?;

        if let Some(section2) = &self.section2 {
            out.write_u24::<BigEndian>(lengths.section2 as u32)?;
            out.write_u8(0)?;
            out.extend_from_slice(&section2.data);
        }

        out.write_u24::<BigEndian>(lengths.section3 as u32)?;
        out.write_u8(0)?;
        out.write_u16::<BigEndian>(self.section3.number_of_subsets)?;
        out.write_u8(self.section3.flags)?;
        encode_descriptors(&self.section3.descriptors, &mut out);
        if lengths.section3 > 7 + 2 * self.section3.descriptors.len() {
            out.write_u8(0)?;
        }

        out.write_u24::<BigEndian>(lengths.section4 as u32)?;
        out.write_u8(0)?;
        out.extend_from_slice(self.section4.payload.as_bytes());

        out.extend_from_slice(b"7777");
        debug_assert_eq!(out.len(), total);
        Ok(out)
    }
}

impl std::fmt::Display for BUFRMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "BUFR Message V{}:", self.edition)?;
        writeln!(f, "{}", self.section1)?;
        writeln!(f, "Section 3:")?;
        writeln!(f, "  Subsets:             {}", self.section3.number_of_subsets)?;
        writeln!(f, "  Observed:            {}", self.section3.is_observation())?;
        writeln!(f, "  Compressed:          {}", self.section3.is_compressed())?;
        let descs: Vec<String> = self
            .section3
            .descriptors
            .iter()
            .map(|d| d.to_string())
            .collect();
        writeln!(f, "  Descriptors:         {}", descs.join(" "))?;
        write!(
            f,
            "Section 4:\n  Payload:             {} bytes",
            self.section4.payload.filled()
        )
    }
}

/// Maps a nom failure inside section `n` onto the framing errors.
fn section<'a, T>(n: u8, res: IResult<&'a [u8], T>) -> Result<(&'a [u8], T)> {
    res.map_err(|e| match e {
        nom::Err::Error(ref inner) | nom::Err::Failure(ref inner)
            if inner.code == ErrorKind::Eof =>
        {
            Error::Truncated { section: n }
        }
        nom::Err::Incomplete(_) => Error::Truncated { section: n },
        other => Error::Nom(format!("section {}: {}", n, other)),
    })
}

#[derive(Clone, Copy)]
struct Section0 {
    total_length: u32,
    version: u8,
}

fn parse_section0(input: &[u8]) -> IResult<&[u8], Section0> {
    let (input, _) = tag("BUFR")(input)?;
    let (input, total_length) = be_u24(input)?;
    let (input, edition) = be_u8(input)?;
    Ok((
        input,
        Section0 {
            total_length,
            version: edition,
        },
    ))
}

fn length_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Failure(nom::error::Error::new(input, ErrorKind::LengthValue))
}

fn parse_section2(input: &[u8]) -> IResult<&[u8], Vec<u8>> {
    let (input, length) = be_u24(input)?;
    if length < 4 {
        return Err(length_error(input));
    }
    let (input, _) = skip1(input)?;
    let (input, data) = take(length as usize - 4)(input)?;
    Ok((input, data.to_vec()))
}

struct RawSection3<'a> {
    number_of_subsets: u16,
    flags: u8,
    data: &'a [u8],
}

fn parse_section3(input: &[u8]) -> IResult<&[u8], RawSection3<'_>> {
    let (input, length) = be_u24(input)?;
    if length < 7 {
        return Err(length_error(input));
    }
    let (input, _) = skip1(input)?;
    let (input, number_of_subsets) = be_u16(input)?;
    let (input, flags) = be_u8(input)?;
    let (input, data) = take(length as usize - 7)(input)?;
    Ok((
        input,
        RawSection3 {
            number_of_subsets,
            flags,
            data,
        },
    ))
}

fn parse_section4(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, length) = be_u24(input)?;
    if length < 4 {
        return Err(length_error(input));
    }
    let (input, _) = skip(1)(input)?;
    take(length as usize - 4)(input)
}
