use serde::{Deserialize, Serialize};

use crate::core::FXY;
use crate::core::tables::TableLookup;
use crate::errors::{Error, Result};

/// Which value array of a [`DataBlock`] holds the authoritative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StoreType {
    Integer,
    #[default]
    Float,
    Double,
}

/// Staging area for element values before they are packed into section 4.
///
/// Values are laid out as `element x value-index x repetition`, with the
/// element varying fastest. Only the array selected by `store_type` is
/// authoritative; [`DataBlock::convert`] derives the integer wire values
/// from it.
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    elements: Vec<FXY>,
    nele: usize,
    nval: usize,
    nt: usize,
    store_type: StoreType,
    ints: Vec<u64>,
    floats: Vec<f32>,
    doubles: Vec<f64>,
    dirty: bool,
}

impl DataBlock {
    pub fn new(store_type: StoreType) -> Self {
        DataBlock {
            store_type,
            ..Default::default()
        }
    }

    pub fn with_dims(store_type: StoreType, nele: usize, nval: usize, nt: usize) -> Self {
        let mut blk = Self::new(store_type);
        blk.alloc(nele, nval, nt);
        blk
    }

    /// Sets the dimensions, reusing the existing allocations. Element codes
    /// beyond `nele` are dropped; values are reset to zero.
    pub fn alloc(&mut self, nele: usize, nval: usize, nt: usize) {
        self.nele = nele;
        self.nval = nval;
        self.nt = nt;
        self.elements.truncate(nele);

        let len = nele * nval * nt;
        self.ints.clear();
        self.ints.resize(len, 0);
        self.floats.clear();
        self.doubles.clear();
        match self.store_type {
            StoreType::Integer => {}
            StoreType::Float => self.floats.resize(len, 0.0),
            StoreType::Double => self.doubles.resize(len, 0.0),
        }
        self.dirty = false;
    }

    pub fn nele(&self) -> usize {
        self.nele
    }

    pub fn nval(&self) -> usize {
        self.nval
    }

    pub fn nt(&self) -> usize {
        self.nt
    }

    pub fn len(&self) -> usize {
        self.nele * self.nval * self.nt
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    pub fn elements(&self) -> &[FXY] {
        &self.elements
    }

    /// True once every value written through a float or double setter has
    /// been turned into its integer form.
    pub fn is_converted(&self) -> bool {
        !self.dirty
    }

    #[inline]
    pub fn index(&self, ele: usize, val: usize, t: usize) -> usize {
        ele + val * self.nele + t * self.nval * self.nele
    }

    fn checked_index(&self, ele: usize, val: usize, t: usize) -> Result<usize> {
        if ele >= self.nele || val >= self.nval || t >= self.nt {
            return Err(Error::IndexOutOfRange(format!(
                "({}, {}, {}) in a {}x{}x{} block",
                ele, val, t, self.nele, self.nval, self.nt
            )));
        }
        Ok(self.index(ele, val, t))
    }

    pub fn element(&self, ele: usize) -> Option<FXY> {
        self.elements.get(ele).copied()
    }

    pub fn set_element(&mut self, ele: usize, descriptor: FXY) -> Result<()> {
        if ele >= self.nele {
            return Err(Error::IndexOutOfRange(format!(
                "element {} of {}",
                ele, self.nele
            )));
        }
        if ele >= self.elements.len() {
            self.elements.resize(ele + 1, FXY::default());
        }
        self.elements[ele] = descriptor;
        Ok(())
    }

    pub fn find_element(&self, descriptor: &FXY) -> Option<usize> {
        self.elements.iter().position(|e| e == descriptor)
    }

    /// Returns the slot of `descriptor`, claiming the next free one if it is
    /// not yet listed.
    pub fn add_element(&mut self, descriptor: FXY) -> Result<usize> {
        if let Some(i) = self.find_element(&descriptor) {
            return Ok(i);
        }
        let i = self.elements.len();
        self.set_element(i, descriptor)?;
        Ok(i)
    }

    pub fn set_int(&mut self, ele: usize, val: usize, t: usize, value: u64) -> Result<()> {
        let i = self.checked_index(ele, val, t)?;
        self.ints[i] = value;
        Ok(())
    }

    pub fn get_int(&self, ele: usize, val: usize, t: usize) -> Result<u64> {
        let i = self.checked_index(ele, val, t)?;
        Ok(self.ints[i])
    }

    pub fn set_float(&mut self, ele: usize, val: usize, t: usize, value: f32) -> Result<()> {
        let i = self.checked_index(ele, val, t)?;
        self.floats.resize(self.len(), 0.0);
        self.floats[i] = value;
        self.dirty = true;
        Ok(())
    }

    pub fn get_float(&self, ele: usize, val: usize, t: usize) -> Result<f32> {
        let i = self.checked_index(ele, val, t)?;
        Ok(self.floats.get(i).copied().unwrap_or_default())
    }

    pub fn set_double(&mut self, ele: usize, val: usize, t: usize, value: f64) -> Result<()> {
        let i = self.checked_index(ele, val, t)?;
        self.doubles.resize(self.len(), 0.0);
        self.doubles[i] = value;
        self.dirty = true;
        Ok(())
    }

    pub fn get_double(&self, ele: usize, val: usize, t: usize) -> Result<f64> {
        let i = self.checked_index(ele, val, t)?;
        Ok(self.doubles.get(i).copied().unwrap_or_default())
    }

    pub fn ints(&self) -> &[u64] {
        &self.ints
    }

    /// Physical value of an integer slot, `None` when it holds the missing
    /// pattern.
    pub fn physical<T: TableLookup + ?Sized>(
        &self,
        tables: &T,
        ele: usize,
        val: usize,
        t: usize,
    ) -> Result<Option<f64>> {
        let raw = self.get_int(ele, val, t)?;
        let descriptor = self.descriptor_at(ele)?;
        let enc = tables.encoding(&descriptor)?;
        Ok(enc.decode_f64(&descriptor, raw))
    }

    fn descriptor_at(&self, ele: usize) -> Result<FXY> {
        self.element(ele)
            .ok_or_else(|| Error::IndexOutOfRange(format!("element {} has no descriptor", ele)))
    }

    /// Converts the authoritative float or double values into integer wire
    /// values using each element's Table B encoding. Missing values become
    /// the all-ones pattern of the element width.
    pub fn convert<T: TableLookup + ?Sized>(&mut self, tables: &T) -> Result<()> {
        if self.store_type == StoreType::Integer {
            self.dirty = false;
            return Ok(());
        }

        for ele in 0..self.nele {
            let descriptor = self.descriptor_at(ele)?;
            let enc = tables.encoding(&descriptor)?;
            for val in 0..self.nval {
                for t in 0..self.nt {
                    let i = self.index(ele, val, t);
                    self.ints[i] = match self.store_type {
                        StoreType::Double => {
                            let v = self.doubles.get(i).copied().unwrap_or_default();
                            enc.encode_f64(descriptor, v)?
                        }
                        _ => {
                            let v = self.floats.get(i).copied().unwrap_or_default();
                            enc.encode_f32(descriptor, v)?
                        }
                    };
                }
            }
        }
        self.dirty = false;
        Ok(())
    }
}

impl std::fmt::Display for DataBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DataBlock {:?} {}x{}x{} [",
            self.store_type, self.nele, self.nval, self.nt
        )?;
        for (i, e) in self.elements.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", e)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tables::{BTableEntry, TableSet};

    fn tables() -> TableSet {
        TableSet::from_entries(
            [
                BTableEntry::new(FXY::new(0, 12, 1), "TEMPERATURE", "K", 1, 0, 12),
                BTableEntry::new(FXY::new(0, 7, 4), "PRESSURE", "PA", -1, 0, 14),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_index_layout() {
        let blk = DataBlock::with_dims(StoreType::Integer, 3, 2, 4);
        assert_eq!(blk.index(0, 0, 0), 0);
        assert_eq!(blk.index(1, 0, 0), 1);
        assert_eq!(blk.index(0, 1, 0), 3);
        assert_eq!(blk.index(0, 0, 1), 6);
        assert_eq!(blk.index(2, 1, 3), 2 + 3 + 18);
        assert_eq!(blk.len(), 24);
        assert!(matches!(blk.get_int(3, 0, 0), Err(Error::IndexOutOfRange(_))));
        assert!(matches!(blk.get_int(0, 0, 4), Err(Error::IndexOutOfRange(_))));
    }

    #[test]
    fn test_elements() {
        let mut blk = DataBlock::with_dims(StoreType::Integer, 2, 1, 1);
        let t = FXY::new(0, 12, 1);
        let p = FXY::new(0, 7, 4);
        assert_eq!(blk.add_element(t).unwrap(), 0);
        assert_eq!(blk.add_element(p).unwrap(), 1);
        assert_eq!(blk.add_element(t).unwrap(), 0);
        assert_eq!(blk.find_element(&p), Some(1));
        assert!(blk.add_element(FXY::new(0, 1, 1)).is_err());

        blk.alloc(1, 1, 1);
        assert_eq!(blk.elements(), &[t]);
    }

    #[test]
    fn test_realloc_keeps_capacity() {
        let mut blk = DataBlock::with_dims(StoreType::Float, 4, 4, 4);
        let cap = blk.ints.capacity();
        blk.alloc(2, 2, 2);
        assert_eq!(blk.len(), 8);
        assert_eq!(blk.ints.capacity(), cap);
    }

    #[test]
    fn test_convert() {
        let tables = tables();
        let mut blk = DataBlock::with_dims(StoreType::Float, 2, 1, 2);
        blk.set_element(0, FXY::new(0, 12, 1)).unwrap();
        blk.set_element(1, FXY::new(0, 7, 4)).unwrap();
        blk.set_float(0, 0, 0, 273.2).unwrap();
        blk.set_float(0, 0, 1, f32::MAX).unwrap();
        blk.set_float(1, 0, 0, 101320.0).unwrap();
        blk.set_float(1, 0, 1, 99000.0).unwrap();
        assert!(!blk.is_converted());

        blk.convert(&tables).unwrap();
        assert!(blk.is_converted());
        assert_eq!(blk.get_int(0, 0, 0).unwrap(), 2732);
        assert_eq!(blk.get_int(0, 0, 1).unwrap(), 4095);
        assert_eq!(blk.get_int(1, 0, 0).unwrap(), 10132);
        assert_eq!(blk.physical(&tables, 1, 0, 1).unwrap(), Some(99000.0));
        assert_eq!(blk.physical(&tables, 0, 0, 1).unwrap(), None);
    }

    #[test]
    fn test_convert_doubles_and_errors() {
        let tables = tables();
        let mut blk = DataBlock::with_dims(StoreType::Double, 1, 1, 1);
        blk.set_element(0, FXY::new(0, 12, 1)).unwrap();
        blk.set_double(0, 0, 0, f64::NAN).unwrap();
        blk.convert(&tables).unwrap();
        assert_eq!(blk.get_int(0, 0, 0).unwrap(), 4095);

        blk.set_double(0, 0, 0, 1000.0).unwrap();
        assert!(matches!(
            blk.convert(&tables),
            Err(Error::ValueOutOfRange { .. })
        ));

        let mut unknown = DataBlock::with_dims(StoreType::Double, 1, 1, 1);
        unknown.set_element(0, FXY::new(0, 99, 1)).unwrap();
        assert!(matches!(
            unknown.convert(&tables),
            Err(Error::TableBNotFound(_))
        ));
    }
}
