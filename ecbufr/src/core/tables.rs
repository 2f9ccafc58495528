use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::FXY;
use crate::errors::{Error, Result};

/// How the bits of a descriptor are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Numeric,
    String,
    CodeTable,
    FlagTable,
    IeeeFloat,
    Sequence,
    Operator,
    Replicator,
    ChangeRefValue,
    Undefined,
}

impl DataType {
    /// Maps a Table B unit to a data type. Unknown units are numeric.
    pub fn from_unit(unit: &str) -> Self {
        let unit = unit.trim().to_ascii_uppercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| unit.starts_with(p));

        if starts(&["NUMERI"]) {
            DataType::Numeric
        } else if starts(&["FLAG TABLE", "TABLE FLAG", "TABLEFLAG", "FLAGTABLE"]) {
            DataType::FlagTable
        } else if starts(&["CODE TABLE", "TABLE CODE", "TABLECODE", "CODETABLE"]) {
            DataType::CodeTable
        } else if starts(&["CCITT IA5", "CCITTIA5", "CCITT_IA5"]) {
            DataType::String
        } else if starts(&["IEEE"]) {
            DataType::IeeeFloat
        } else {
            DataType::Numeric
        }
    }

    /// Type implied by the descriptor class alone, for everything that is
    /// not a Table B element.
    pub fn for_descriptor(fxy: &FXY) -> Self {
        match fxy.f {
            1 => DataType::Replicator,
            2 if fxy.x == 3 => DataType::ChangeRefValue,
            2 if fxy.x == 5 => DataType::String,
            2 => DataType::Operator,
            3 => DataType::Sequence,
            _ => DataType::Undefined,
        }
    }
}

/// Bit level encoding of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEncoding {
    pub data_type: DataType,
    pub scale: i32,
    pub reference: i32,
    pub nbits: u32,
    /// Width of an associated field written ahead of the value, 0 if none.
    pub af_nbits: u32,
}

impl ValueEncoding {
    pub fn new(data_type: DataType, scale: i32, reference: i32, nbits: u32) -> Self {
        ValueEncoding {
            data_type,
            scale,
            reference,
            nbits,
            af_nbits: 0,
        }
    }

    pub fn with_associated_field(mut self, af_nbits: u32) -> Self {
        self.af_nbits = af_nbits;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BTableEntry {
    pub fxy: FXY,
    pub class_name_en: String,
    pub element_name_en: String,
    pub bufr_unit: String,
    pub bufr_scale: i32,
    pub bufr_reference_value: i32,
    pub bufr_datawidth_bits: u32,
    pub note_en: Option<String>,
}

impl BTableEntry {
    pub fn new(
        fxy: FXY,
        element_name_en: &str,
        bufr_unit: &str,
        bufr_scale: i32,
        bufr_reference_value: i32,
        bufr_datawidth_bits: u32,
    ) -> Self {
        BTableEntry {
            fxy,
            class_name_en: String::new(),
            element_name_en: element_name_en.to_string(),
            bufr_unit: bufr_unit.to_string(),
            bufr_scale,
            bufr_reference_value,
            bufr_datawidth_bits,
            note_en: None,
        }
    }

    pub fn fxy(&self) -> FXY {
        self.fxy
    }

    pub fn data_type(&self) -> DataType {
        DataType::from_unit(&self.bufr_unit)
    }

    pub fn encoding(&self) -> ValueEncoding {
        ValueEncoding::new(
            self.data_type(),
            self.bufr_scale,
            self.bufr_reference_value,
            self.bufr_datawidth_bits,
        )
    }
}

impl Display for BTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let element_name = if self.element_name_en.chars().count() > 40 {
            format!("{}...", self.element_name_en.chars().take(37).collect::<String>())
        } else {
            self.element_name_en.clone()
        };

        write!(
            f,
            "{} | {:<40} | {:<15} | {:>5} | {:>11} | {:>3}",
            self.fxy,
            element_name,
            self.bufr_unit,
            self.bufr_scale,
            self.bufr_reference_value,
            self.bufr_datawidth_bits,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DTableEntry {
    pub fxy: FXY,
    pub fxy_chain: Vec<FXY>,
    pub title_en: Option<String>,
}

impl DTableEntry {
    pub fn new(fxy: FXY, fxy_chain: Vec<FXY>) -> Self {
        DTableEntry {
            fxy,
            fxy_chain,
            title_en: None,
        }
    }

    pub fn fxy(&self) -> FXY {
        self.fxy
    }

    pub fn fxy_chain(&self) -> &[FXY] {
        &self.fxy_chain
    }

    /// True when every replication inside the chain has its whole body
    /// inside the chain as well.
    pub fn is_closed(&self) -> bool {
        let chain = &self.fxy_chain;
        let mut i = 0;
        while i < chain.len() {
            let d = chain[i];
            if d.is_replication() {
                let extra = if d.y == 0 { 1 } else { 0 };
                if i + 1 + extra + d.x as usize > chain.len() {
                    return false;
                }
            }
            i += 1;
        }
        true
    }
}

impl Display for DTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let chain: Vec<String> = self.fxy_chain.iter().map(|c| c.to_string()).collect();
        write!(
            f,
            "{} | {:<40} | {}",
            self.fxy,
            self.title_en.as_deref().unwrap_or(""),
            chain.join(" ")
        )
    }
}

/// Lookup seam used by the value codec, the writer and the zip pass.
pub trait TableLookup {
    fn lookup_b(&self, fxy: &FXY) -> Option<&BTableEntry>;

    fn lookup_d(&self, fxy: &FXY) -> Option<&DTableEntry>;

    /// Table D entries whose chain starts with `first`.
    fn sequences_starting_with(&self, first: &FXY) -> Vec<&DTableEntry>;

    fn encoding(&self, fxy: &FXY) -> Result<ValueEncoding> {
        self.lookup_b(fxy)
            .map(|e| e.encoding())
            .ok_or(Error::TableBNotFound(*fxy))
    }
}

/// One Table B and one Table D.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    table_b: FxHashMap<FXY, BTableEntry>,
    table_d: FxHashMap<FXY, DTableEntry>,
    by_first: FxHashMap<FXY, Vec<FXY>>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<B, D>(b_entries: B, d_entries: D) -> Self
    where
        B: IntoIterator<Item = BTableEntry>,
        D: IntoIterator<Item = DTableEntry>,
    {
        let mut set = TableSet::new();
        b_entries.into_iter().for_each(|e| set.insert_b(e));
        d_entries.into_iter().for_each(|e| set.insert_d(e));
        set
    }

    pub fn insert_b(&mut self, entry: BTableEntry) {
        self.table_b.insert(entry.fxy, entry);
    }

    pub fn insert_d(&mut self, entry: DTableEntry) {
        if let Some(old) = self.table_d.get(&entry.fxy) {
            if let Some(first) = old.fxy_chain.first() {
                if let Some(list) = self.by_first.get_mut(first) {
                    list.retain(|c| *c != entry.fxy);
                }
            }
        }
        if let Some(first) = entry.fxy_chain.first() {
            self.by_first.entry(*first).or_default().push(entry.fxy);
        }
        self.table_d.insert(entry.fxy, entry);
    }

    pub fn b_count(&self) -> usize {
        self.table_b.len()
    }

    pub fn d_count(&self) -> usize {
        self.table_d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table_b.is_empty() && self.table_d.is_empty()
    }
}

impl TableLookup for TableSet {
    fn lookup_b(&self, fxy: &FXY) -> Option<&BTableEntry> {
        self.table_b.get(fxy)
    }

    fn lookup_d(&self, fxy: &FXY) -> Option<&DTableEntry> {
        self.table_d.get(fxy)
    }

    fn sequences_starting_with(&self, first: &FXY) -> Vec<&DTableEntry> {
        self.by_first
            .get(first)
            .map(|codes| codes.iter().filter_map(|c| self.table_d.get(c)).collect())
            .unwrap_or_default()
    }
}

/// Master tables with an optional local overlay. Local entries shadow
/// master entries with the same descriptor.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    master: TableSet,
    local: Option<TableSet>,
}

impl Tables {
    pub fn new(master: TableSet) -> Self {
        Tables {
            master,
            local: None,
        }
    }

    pub fn with_local(mut self, local: TableSet) -> Self {
        self.local = Some(local);
        self
    }

    pub fn master(&self) -> &TableSet {
        &self.master
    }

    pub fn local(&self) -> Option<&TableSet> {
        self.local.as_ref()
    }
}

impl TableLookup for Tables {
    #[inline]
    fn lookup_b(&self, fxy: &FXY) -> Option<&BTableEntry> {
        self.local
            .as_ref()
            .and_then(|t| t.lookup_b(fxy))
            .or_else(|| self.master.lookup_b(fxy))
    }

    #[inline]
    fn lookup_d(&self, fxy: &FXY) -> Option<&DTableEntry> {
        self.local
            .as_ref()
            .and_then(|t| t.lookup_d(fxy))
            .or_else(|| self.master.lookup_d(fxy))
    }

    fn sequences_starting_with(&self, first: &FXY) -> Vec<&DTableEntry> {
        let mut found = self
            .local
            .as_ref()
            .map(|t| t.sequences_starting_with(first))
            .unwrap_or_default();
        for entry in self.master.sequences_starting_with(first) {
            if !found.iter().any(|e| e.fxy == entry.fxy) {
                found.push(entry);
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_to_datatype() {
        assert_eq!(DataType::from_unit("CCITT IA5"), DataType::String);
        assert_eq!(DataType::from_unit("Code table"), DataType::CodeTable);
        assert_eq!(DataType::from_unit("FLAG TABLE"), DataType::FlagTable);
        assert_eq!(DataType::from_unit("NUMERIC"), DataType::Numeric);
        assert_eq!(DataType::from_unit("K"), DataType::Numeric);
    }

    #[test]
    fn test_local_shadows_master() {
        let code = FXY::new(0, 12, 101);
        let master = TableSet::from_entries([BTableEntry::new(code, "T", "K", 2, 0, 16)], []);
        let local = TableSet::from_entries([BTableEntry::new(code, "T", "K", 1, 0, 12)], []);
        let tables = Tables::new(master).with_local(local);
        assert_eq!(tables.encoding(&code).unwrap().nbits, 12);
        assert!(matches!(
            tables.encoding(&FXY::new(0, 1, 1)),
            Err(Error::TableBNotFound(_))
        ));
    }

    #[test]
    fn test_first_child_index() {
        let a = FXY::new(0, 4, 1);
        let b = FXY::new(0, 4, 2);
        let mut set = TableSet::new();
        set.insert_d(DTableEntry::new(FXY::new(3, 1, 11), vec![a, b]));
        set.insert_d(DTableEntry::new(FXY::new(3, 1, 12), vec![b, a]));
        assert_eq!(set.sequences_starting_with(&a).len(), 1);
        set.insert_d(DTableEntry::new(FXY::new(3, 1, 11), vec![b]));
        assert!(set.sequences_starting_with(&a).is_empty());
        assert_eq!(set.sequences_starting_with(&b).len(), 2);
    }

    #[test]
    fn test_closed_chain() {
        let open = DTableEntry::new(
            FXY::new(3, 1, 1),
            vec![FXY::new(0, 1, 1), FXY::new(1, 2, 0)],
        );
        assert!(!open.is_closed());
        let closed = DTableEntry::new(
            FXY::new(3, 1, 2),
            vec![
                FXY::new(1, 1, 0),
                FXY::new(0, 31, 1),
                FXY::new(0, 1, 1),
            ],
        );
        assert!(closed.is_closed());
    }
}
