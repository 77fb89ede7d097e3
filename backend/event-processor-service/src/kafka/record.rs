//! Conversions between rdkafka messages and pipeline records.

use cdc_pipeline::ConsumedRecord;
use rdkafka::message::{Headers, Message};
use std::collections::BTreeMap;

pub fn to_consumed_record<M: Message>(message: &M) -> ConsumedRecord {
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

/// All headers of a message as `(key, value)` pairs
pub fn header_pairs<M: Message>(message: &M) -> Vec<(&str, Option<&[u8]>)> {
    message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| (header.key, header.value))
                .collect()
        })
        .unwrap_or_default()
}

/// Records of one topic partition, in delivered order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionBatch {
    pub topic: String,
    pub partition: i32,
    pub records: Vec<ConsumedRecord>,
}

impl PartitionBatch {
    /// Offset to commit once this batch is done
    pub fn next_offset(&self) -> Option<i64> {
        self.records.iter().map(|r| r.offset).max().map(|o| o + 1)
    }
}

/// Split a polled batch by topic partition, keeping per-partition order.
pub fn group_by_partition(records: Vec<ConsumedRecord>) -> Vec<PartitionBatch> {
    let mut grouped: BTreeMap<(String, i32), Vec<ConsumedRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry((record.topic.clone(), record.partition))
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|((topic, partition), records)| PartitionBatch {
            topic,
            partition,
            records,
        })
        .collect()
}
