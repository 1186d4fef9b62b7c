use tantivy::{
    Index,
    schema::{
        FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, SchemaBuilder,
        TextFieldIndexing, TextOptions,
    },
    tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer},
};

use super::error::Result;

/// Splits on non-alphanumeric characters and lowercases, like [`crate::similarity::tokenize`].
pub const ALIAS_TOKENIZER: &str = "geocodeur_alias";

pub const KIND_FEATURE: &str = "feature";
pub const KIND_ALIAS: &str = "alias";

/// Resolved fields of the geocode index.
///
/// Feature and alias documents share one index so that a batch commit makes
/// both visible at once. `kind` tells them apart.
#[derive(Debug, Clone, Copy)]
pub struct GeocodeFields {
    pub kind: Field,
    /// Feature id, on feature documents.
    pub id: Field,
    /// Owning feature id, on alias documents.
    pub feature_id: Field,
    pub name: Field,
    pub class: Field,
    pub subclass: Field,
    pub divisions: Field,
    pub geometry: Field,
    pub alias: Field,
    /// Every pg_trgm trigram of the alias, once.
    pub trigram: Field,
    pub class_rank: Field,
    pub subclass_rank: Field,
    pub word_count: Field,
    pub char_count: Field,
    pub rank_key: Field,
}

impl GeocodeFields {
    pub fn schema() -> Schema {
        let mut schema_builder = SchemaBuilder::new();

        let alias_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(ALIAS_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqs),
            )
            .set_stored();
        let trigram_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("raw")
                .set_index_option(IndexRecordOption::WithFreqs),
        );

        schema_builder.add_text_field("kind", STRING);
        schema_builder.add_u64_field("id", INDEXED | STORED);
        schema_builder.add_u64_field("feature_id", INDEXED | STORED);
        schema_builder.add_text_field("name", STORED);
        schema_builder.add_text_field("class", STRING | STORED);
        schema_builder.add_text_field("subclass", STORED);
        schema_builder.add_text_field("divisions", STORED);
        schema_builder.add_text_field("geometry", STORED);
        schema_builder.add_text_field("alias", alias_options);
        schema_builder.add_text_field("trigram", trigram_options);
        schema_builder.add_u64_field("class_rank", STORED);
        schema_builder.add_u64_field("subclass_rank", STORED);
        schema_builder.add_u64_field("word_count", INDEXED | STORED);
        schema_builder.add_u64_field("char_count", INDEXED | STORED);
        schema_builder.add_u64_field("rank_key", FAST | STORED);
        schema_builder.build()
    }

    pub fn resolve(schema: &Schema) -> Result<Self> {
        Ok(Self {
            kind: schema.get_field("kind")?,
            id: schema.get_field("id")?,
            feature_id: schema.get_field("feature_id")?,
            name: schema.get_field("name")?,
            class: schema.get_field("class")?,
            subclass: schema.get_field("subclass")?,
            divisions: schema.get_field("divisions")?,
            geometry: schema.get_field("geometry")?,
            alias: schema.get_field("alias")?,
            trigram: schema.get_field("trigram")?,
            class_rank: schema.get_field("class_rank")?,
            subclass_rank: schema.get_field("subclass_rank")?,
            word_count: schema.get_field("word_count")?,
            char_count: schema.get_field("char_count")?,
            rank_key: schema.get_field("rank_key")?,
        })
    }
}

/// Tokenizers are not persisted with the index; register them on every open.
pub fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(ALIAS_TOKENIZER, analyzer);
}
