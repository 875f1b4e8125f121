//! Tile views: one PostGIS-rendered vector tile layer per endpoint.
//!
//! A [`TileSpec`] names a relation, its geometry column and the columns to
//! carry along as feature properties. [`TileView::build`] renders the SQL
//! statement for it once; every request afterwards only binds the tile bounds.
//!
//! Identifiers are spliced into the statement text because placeholders can
//! only carry values. They must come from trusted configuration, never from
//! a request, and are checked against a strict identifier format.
use crate::{bounds::TileCoordinate, error::Error, store::TileStore, TileSource};

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use async_trait::async_trait;

/// Spatial reference of the stored geometries (WGS84 lon/lat).
pub const GEOGRAPHIC_SRID: i32 = 4326;

const DEFAULT_EXTENT: u32 = 4096;
const DEFAULT_BUFFER: u32 = 256;

// $1-$4 clip the geometry, $5-$8 filter by intersection.
const MVT_STATEMENT: &str = "\
WITH mvt_geom AS (
  SELECT
    {properties},
    ST_AsMVTGeom(
      {geom_column},
      ST_MakeBox2D(ST_Point($1, $2), ST_Point($3, $4)),
      {extent}, {buffer}, true
    ) AS geom
  FROM
    {relation}
  WHERE
    ST_Intersects(
      {geom_column},
      ST_MakeEnvelope($5, $6, $7, $8, {srid})
    )
)
SELECT
  ST_AsMVT(mvt_geom.*, '{layer}', {extent}, 'geom')
FROM
  mvt_geom";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

static RELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*\.)?[A-Za-z_][A-Za-z0-9_]*$")
        .expect("valid relation pattern")
});

/// Declarative description of one tile endpoint.
#[derive(Clone, Deserialize, Debug)]
pub struct TileSpec {
    pub relation: String,
    #[serde(rename = "geometry")]
    pub geometry_column: String,
    /// Source columns with their output names, in projection order.
    #[serde(deserialize_with = "ordered_properties")]
    pub properties: Vec<Property>,
    /// MVT layer name. Defaults to the relation name.
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default = "default_extent")]
    pub extent: u32,
    #[serde(default = "default_buffer")]
    pub buffer: u32,
    #[serde(default)]
    pub aggregates: Vec<Aggregate>,
}

/// A projected source column. Without an alias the column name is used verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Property {
    pub column: String,
    pub alias: Option<String>,
}

/// A property collected from a related relation, e.g. the short names of
/// every route serving a stop. Values are de-duplicated, sorted and joined
/// with commas.
#[derive(Clone, Deserialize, Debug)]
pub struct Aggregate {
    pub relation: String,
    /// Column of the tile relation used in the join.
    pub local_key: String,
    /// Column of the related relation matching `local_key`.
    pub foreign_key: String,
    pub column: String,
    pub alias: String,
}

fn default_extent() -> u32 {
    DEFAULT_EXTENT
}

fn default_buffer() -> u32 {
    DEFAULT_BUFFER
}

// Keeps the document order of a `column: alias` mapping.
fn ordered_properties<'de, D>(deserializer: D) -> Result<Vec<Property>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PropertiesVisitor;

    impl<'de> Visitor<'de> for PropertiesVisitor {
        type Value = Vec<Property>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a mapping of column names to optional aliases")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut properties = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((column, alias)) = map.next_entry::<String, Option<String>>()? {
                properties.push(Property { column, alias });
            }
            Ok(properties)
        }
    }

    deserializer.deserialize_map(PropertiesVisitor)
}

impl TileSpec {
    /// Describes a view over `relation` with default extent, buffer and layer name.
    pub fn new<'a>(
        relation: &str,
        geometry_column: &str,
        properties: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
    ) -> TileSpec {
        TileSpec {
            relation: relation.to_owned(),
            geometry_column: geometry_column.to_owned(),
            properties: properties
                .into_iter()
                .map(|(column, alias)| Property {
                    column: column.to_owned(),
                    alias: alias.map(str::to_owned),
                })
                .collect(),
            layer: None,
            extent: DEFAULT_EXTENT,
            buffer: DEFAULT_BUFFER,
            aggregates: Vec::new(),
        }
    }

    /// The layer name, falling back to the unqualified relation name.
    pub fn layer_name(&self) -> &str {
        match &self.layer {
            Some(layer) => layer.as_str(),
            None => self
                .relation
                .rsplit('.')
                .next()
                .unwrap_or(&self.relation),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        check(&RELATION, "relation", &self.relation)?;
        check(&IDENTIFIER, "geometry column", &self.geometry_column)?;

        if self.properties.is_empty() {
            return Err(Error::Configuration(format!(
                "no properties given for relation '{}'",
                self.relation
            )));
        }
        for property in self.properties.iter() {
            check(&IDENTIFIER, "property column", &property.column)?;
            if let Some(alias) = &property.alias {
                check(&IDENTIFIER, "property alias", alias)?;
            }
        }

        for aggregate in self.aggregates.iter() {
            check(&RELATION, "aggregate relation", &aggregate.relation)?;
            check(&IDENTIFIER, "aggregate local key", &aggregate.local_key)?;
            check(&IDENTIFIER, "aggregate foreign key", &aggregate.foreign_key)?;
            check(&IDENTIFIER, "aggregate column", &aggregate.column)?;
            check(&IDENTIFIER, "aggregate alias", &aggregate.alias)?;
        }

        check(&IDENTIFIER, "layer name", self.layer_name())?;

        if self.extent == 0 {
            return Err(Error::Configuration(String::from(
                "tile extent must be positive",
            )));
        }

        Ok(())
    }

    // Everything selected by the inner query except the clipped geometry.
    fn property_list(&self) -> Vec<String> {
        let columns = self.properties.iter().map(|property| match &property.alias {
            Some(alias) => format!("{} AS {}", property.column, alias),
            None => property.column.clone(),
        });

        let aggregates = self.aggregates.iter().map(|aggregate| {
            format!(
                "(SELECT string_agg(DISTINCT agg.{column}::text, ',' ORDER BY agg.{column}::text) \
                 FROM {relation} AS agg WHERE agg.{foreign_key} = {outer}.{local_key}) AS {alias}",
                column = aggregate.column,
                relation = aggregate.relation,
                foreign_key = aggregate.foreign_key,
                outer = self.relation,
                local_key = aggregate.local_key,
                alias = aggregate.alias,
            )
        });

        columns.chain(aggregates).collect()
    }

    fn statement_sql(&self) -> String {
        MVT_STATEMENT
            .replace("{properties}", &self.property_list().join(",\n    "))
            .replace("{geom_column}", &self.geometry_column)
            .replace("{relation}", &self.relation)
            .replace("{layer}", self.layer_name())
            .replace("{extent}", &self.extent.to_string())
            .replace("{buffer}", &self.buffer.to_string())
            .replace("{srid}", &GEOGRAPHIC_SRID.to_string())
    }
}

fn check(pattern: &Regex, what: &str, value: &str) -> Result<(), Error> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(Error::Configuration(format!("invalid {what} '{value}'")))
    }
}

/// A ready-to-serve tile endpoint. The statement is rendered once and shared
/// read-only by every request.
#[derive(Clone, Debug)]
pub struct TileView {
    layer: String,
    statement: String,
}

impl TileView {
    /// Validates `spec` and renders its statement. Never touches the store.
    pub fn build(spec: &TileSpec) -> Result<TileView, Error> {
        spec.validate()?;

        Ok(TileView {
            layer: spec.layer_name().to_owned(),
            statement: spec.statement_sql(),
        })
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }
}

#[async_trait]
impl TileSource for TileView {
    async fn render_mvt(
        &self,
        store: &dyn TileStore,
        tile: TileCoordinate,
    ) -> Result<Vec<u8>, Error> {
        let bounds = tile.bounds();
        let raw_tile = store
            .fetch_tile(&self.statement, bounds.bind_params())
            .await?;

        // No row and a NULL aggregate are both just an empty tile
        Ok(raw_tile.unwrap_or_default())
    }
}
