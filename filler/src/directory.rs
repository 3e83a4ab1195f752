// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Fields and sources, discovered as the stream reveals them.

A source is identified by its name. A field is a pointing: an offset from a
source's nominal position. Both directories only ever grow, so an id stays
valid for the whole run once it has been handed out.

 */

use crate::error::{FillerError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    pub id: usize,
    pub name: String,

    /// Catalog position in radians. This is (0, 0) until a pointing with
    /// zero offset is seen.
    pub ra: f64,
    pub dec: f64,

    pub purpose: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub id: usize,
    pub source: usize,

    /// Pointing offsets in radians, compared exactly.
    pub dra: f32,
    pub ddec: f32,

    /// The phase center's base position when the field was created.
    pub ra: f64,
    pub dec: f64,

    /// Whether this field defined its source's catalog position.
    pub central: bool,
}

impl Field {
    /// The phase center: the base position shifted by the pointing offset.
    pub fn direction(&self) -> (f64, f64) {
        (
            self.ra + self.dra as f64 / self.dec.cos(),
            self.dec + self.ddec as f64,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldSourceDirectory {
    sources: Vec<Source>,
    fields: Vec<Field>,
    max_fields: usize,
    max_sources: usize,
}

impl FieldSourceDirectory {
    pub fn new(max_fields: usize, max_sources: usize) -> Self {
        FieldSourceDirectory {
            sources: Vec::new(),
            fields: Vec::new(),
            max_fields,
            max_sources,
        }
    }

    /// Find the source with this name, adding it if needed. Returns its
    /// index.
    pub fn resolve_source(&mut self, name: &str) -> Result<usize> {
        if let Some(i) = self.sources.iter().position(|s| s.name == name) {
            return Ok(i);
        }

        if self.sources.len() == self.max_sources {
            return Err(FillerError::CapacityExceeded {
                what: "sources",
                limit: self.max_sources,
            });
        }

        let id = self.sources.len();
        self.sources.push(Source {
            id,
            name: name.to_owned(),
            ra: 0.,
            dec: 0.,
            purpose: "S".to_owned(),
        });
        Ok(id)
    }

    /// Find the field with this pointing offset and source, adding it if
    /// needed. Returns its index.
    ///
    /// A new field with zero offset is where the source really is, so its
    /// position (*ra*, *dec*) becomes the source's catalog position.
    pub fn resolve_field(&mut self, offset: (f32, f32), source: usize, ra: f64, dec: f64) -> Result<usize> {
        let (dra, ddec) = offset;

        if let Some(i) = self
            .fields
            .iter()
            .position(|f| f.dra == dra && f.ddec == ddec && f.source == source)
        {
            return Ok(i);
        }

        if self.fields.len() == self.max_fields {
            return Err(FillerError::CapacityExceeded {
                what: "fields",
                limit: self.max_fields,
            });
        }

        let src = self.sources.get_mut(source).ok_or_else(|| {
            FillerError::malformed("source", format!("no source with index {source}"))
        })?;

        let central = dra == 0. && ddec == 0.;

        if central {
            src.ra = ra;
            src.dec = dec;
        }

        let id = self.fields.len();
        self.fields.push(Field {
            id,
            source,
            dra,
            ddec,
            ra,
            dec,
            central,
        });
        Ok(id)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The name a field gets in the output: its source's name, marked if it
    /// is the source's central pointing.
    pub fn field_name(&self, field: &Field, suffix_central: bool) -> String {
        let name = self
            .sources
            .get(field.source)
            .map_or("unknown", |s| s.name.as_str());

        if suffix_central && field.central {
            format!("{name}_C")
        } else {
            name.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_dedup_by_name() {
        let mut dir = FieldSourceDirectory::new(8, 8);
        assert_eq!(dir.resolve_source("3C286").unwrap(), 0);
        assert_eq!(dir.resolve_source("M82").unwrap(), 1);
        assert_eq!(dir.resolve_source("3C286").unwrap(), 0);
        assert_eq!(dir.sources().len(), 2);
        assert_eq!(dir.sources()[1].ra, 0.);
    }

    #[test]
    fn fields_in_order_of_first_appearance() {
        let mut dir = FieldSourceDirectory::new(8, 8);
        let a = dir.resolve_source("a").unwrap();
        let b = dir.resolve_source("b").unwrap();

        let keys = [
            ((0., 0.), a),
            ((1e-4, 0.), a),
            ((0., 0.), a),
            ((0., 0.), b),
            ((1e-4, 0.), a),
            ((1e-4, 2e-4), b),
        ];

        let ids: Vec<_> = keys
            .iter()
            .map(|(off, src)| dir.resolve_field(*off, *src, 1.0, 0.5).unwrap())
            .collect();

        assert_eq!(ids, vec![0, 1, 0, 2, 1, 3]);
        assert_eq!(dir.fields().len(), 4);
        assert!(dir.fields()[0].central);
        assert!(!dir.fields()[1].central);
        assert!(!dir.fields()[3].central);
    }

    #[test]
    fn first_zero_offset_sets_catalog_position() {
        let mut dir = FieldSourceDirectory::new(8, 8);
        let s = dir.resolve_source("orion").unwrap();

        dir.resolve_field((1e-4, 0.), s, 9.0, 9.0).unwrap();
        assert_eq!((dir.sources()[s].ra, dir.sources()[s].dec), (0., 0.));

        dir.resolve_field((0., 0.), s, 1.5, -0.1).unwrap();
        assert_eq!((dir.sources()[s].ra, dir.sources()[s].dec), (1.5, -0.1));

        // the same key again is not a new field, so it changes nothing
        dir.resolve_field((0., 0.), s, 2.5, -0.2).unwrap();
        assert_eq!((dir.sources()[s].ra, dir.sources()[s].dec), (1.5, -0.1));

        let f = dir.fields()[1].clone();
        assert_eq!(dir.field_name(&f, true), "orion_C");
        assert_eq!(dir.field_name(&f, false), "orion");
        let f = dir.fields()[0].clone();
        assert_eq!(dir.field_name(&f, true), "orion");
    }

    #[test]
    fn capacity_is_enforced() {
        let mut dir = FieldSourceDirectory::new(2, 1);
        let s = dir.resolve_source("x").unwrap();
        dir.resolve_field((0., 0.), s, 0., 0.).unwrap();
        dir.resolve_field((1., 0.), s, 0., 0.).unwrap();

        // known keys still resolve at capacity
        assert_eq!(dir.resolve_field((1., 0.), s, 0., 0.).unwrap(), 1);

        assert!(matches!(
            dir.resolve_field((2., 0.), s, 0., 0.),
            Err(FillerError::CapacityExceeded { what: "fields", limit: 2 })
        ));
        assert_eq!(dir.fields().len(), 2);

        assert!(matches!(
            dir.resolve_source("y"),
            Err(FillerError::CapacityExceeded { what: "sources", limit: 1 })
        ));
    }

    #[test]
    fn field_direction_applies_offsets() {
        let mut dir = FieldSourceDirectory::new(8, 8);
        let s = dir.resolve_source("x").unwrap();
        dir.resolve_field((1e-3, 2e-3), s, 1.0, 0.0).unwrap();
        let (ra, dec) = dir.fields()[0].direction();
        approx::assert_abs_diff_eq!(ra, 1.001, epsilon = 1e-7);
        approx::assert_abs_diff_eq!(dec, 0.002, epsilon = 1e-7);
    }
}
