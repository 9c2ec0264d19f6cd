use crate::error::ModeError;
use crate::stream::buffer::EventBuffer;
use crate::table::GenericTable;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Snapshot of chain-level and world tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLayerStateResponse {
    pub chain_tables: Vec<GenericTable>,
    pub world_tables: Vec<GenericTable>,
}

impl QueryLayerStateResponse {
    pub fn from_tables(chain_tables: Vec<GenericTable>, world_tables: Vec<GenericTable>) -> Self {
        Self {
            chain_tables,
            world_tables,
        }
    }

    /// Wraps a single table, placed by whether it is a chain-level table.
    pub fn from_table(table: GenericTable, is_internal: bool) -> Self {
        if is_internal {
            Self::from_tables(vec![table], Vec::new())
        } else {
            Self::from_tables(Vec::new(), vec![table])
        }
    }

    pub fn chain_table(&self, name: &str) -> Option<&GenericTable> {
        self.chain_tables.iter().find(|t| t.table_name == name)
    }

    pub fn world_table(&self, name: &str) -> Option<&GenericTable> {
        self.world_tables.iter().find(|t| t.table_name == name)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "chain_tables": self.chain_tables.iter().map(GenericTable::to_json).collect::<Vec<_>>(),
            "world_tables": self.world_tables.iter().map(GenericTable::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Changes between two checkpoints, split by scope and change type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLayerStateStreamResponse {
    pub inserted_chain_tables: Vec<GenericTable>,
    pub inserted_world_tables: Vec<GenericTable>,
    pub updated_chain_tables: Vec<GenericTable>,
    pub updated_world_tables: Vec<GenericTable>,
    pub deleted_chain_tables: Vec<GenericTable>,
    pub deleted_world_tables: Vec<GenericTable>,
}

impl QueryLayerStateStreamResponse {
    pub fn from_buffers(inserted: &EventBuffer, updated: &EventBuffer, deleted: &EventBuffer) -> Self {
        Self {
            inserted_chain_tables: inserted.chain_tables().to_vec(),
            inserted_world_tables: inserted.world_tables().to_vec(),
            updated_chain_tables: updated.chain_tables().to_vec(),
            updated_world_tables: updated.world_tables().to_vec(),
            deleted_chain_tables: deleted.chain_tables().to_vec(),
            deleted_world_tables: deleted.world_tables().to_vec(),
        }
    }

    fn buckets(&self) -> [&Vec<GenericTable>; 6] {
        [
            &self.inserted_chain_tables,
            &self.inserted_world_tables,
            &self.updated_chain_tables,
            &self.updated_world_tables,
            &self.deleted_chain_tables,
            &self.deleted_world_tables,
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.buckets().iter().all(|b| b.is_empty())
    }

    pub fn row_count(&self) -> usize {
        self.buckets()
            .iter()
            .flat_map(|b| b.iter())
            .map(GenericTable::row_count)
            .sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let render = |tables: &Vec<GenericTable>| {
            tables
                .iter()
                .map(GenericTable::to_json)
                .collect::<Vec<_>>()
        };
        serde_json::json!({
            "inserted_chain_tables": render(&self.inserted_chain_tables),
            "inserted_world_tables": render(&self.inserted_world_tables),
            "updated_chain_tables": render(&self.updated_chain_tables),
            "updated_world_tables": render(&self.updated_world_tables),
            "deleted_chain_tables": render(&self.deleted_chain_tables),
            "deleted_world_tables": render(&self.deleted_world_tables),
        })
    }
}

/// Encodes a response as msgpack.
pub fn encode<T: Serialize>(response: &T) -> Result<Vec<u8>, ModeError> {
    rmp_serde::to_vec(response).map_err(|e| ModeError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ModeError> {
    rmp_serde::from_slice(bytes).map_err(|e| ModeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{QueryLayerStateResponse, QueryLayerStateStreamResponse, decode, encode};
    use crate::catalog::types::{FieldType, Row, Value};
    use crate::table::{FieldDescriptor, GenericTable};

    fn block_table(n: u128) -> GenericTable {
        GenericTable {
            table_name: "BlockNumber".into(),
            fields: vec![FieldDescriptor {
                name: "value".into(),
                field_type: FieldType::U256,
            }],
            rows: vec![Row::from_values(vec![Value::u256_from_u128(n)])],
        }
    }

    #[test]
    fn single_table_is_placed_by_scope() {
        let chain = QueryLayerStateResponse::from_table(block_table(1), true);
        assert!(chain.chain_table("BlockNumber").is_some());
        assert!(chain.world_tables.is_empty());
        let world = QueryLayerStateResponse::from_table(block_table(1), false);
        assert!(world.world_table("BlockNumber").is_some());
    }

    #[test]
    fn stream_response_survives_msgpack() {
        let response = QueryLayerStateStreamResponse {
            updated_chain_tables: vec![block_table(42)],
            ..Default::default()
        };
        let decoded: QueryLayerStateStreamResponse =
            decode(&encode(&response).expect("encode")).expect("decode");
        assert_eq!(decoded, response);
        assert_eq!(decoded.row_count(), 1);
        assert!(!decoded.is_empty());
        assert!(QueryLayerStateStreamResponse::default().is_empty());
    }

    #[test]
    fn json_rendering_uses_decimal_words() {
        let response = QueryLayerStateStreamResponse {
            updated_chain_tables: vec![block_table(42)],
            ..Default::default()
        };
        let json = response.to_json();
        assert_eq!(json["updated_chain_tables"][0]["rows"][0][0], "42");
        assert_eq!(json["updated_chain_tables"][0]["fields"][0]["type"], "u256");
    }
}
