use super::value_objects::*;

/// Broadcast by the broker after a record is appended to a partition log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAppended {
    pub topic_partition: TopicPartition,
    pub offset: Offset,
}

impl RecordAppended {
    pub fn new(topic_partition: TopicPartition, offset: Offset) -> Self {
        Self {
            topic_partition,
            offset,
        }
    }

    /// Whether a reader of `topic` positioned at `position` in the appended
    /// partition has something new to fetch
    pub fn is_visible_to(&self, topic: &TopicName, position: Option<Offset>) -> bool {
        self.topic_partition.topic == *topic
            && position.map_or(false, |position| self.offset >= position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appended(topic: &str, offset: u64) -> RecordAppended {
        let tp = TopicPartition::new(TopicName::new(topic).unwrap(), PartitionId(0));
        RecordAppended::new(tp, Offset::new(offset))
    }

    #[test]
    fn append_at_or_past_position_is_visible() {
        let people = TopicName::new("people").unwrap();
        assert!(appended("people", 3).is_visible_to(&people, Some(Offset::new(3))));
        assert!(appended("people", 5).is_visible_to(&people, Some(Offset::new(3))));
    }

    #[test]
    fn other_topics_and_old_offsets_are_not_visible() {
        let people = TopicName::new("people").unwrap();
        assert!(!appended("orders", 3).is_visible_to(&people, Some(Offset::new(0))));
        assert!(!appended("people", 2).is_visible_to(&people, Some(Offset::new(3))));
        assert!(!appended("people", 2).is_visible_to(&people, None));
    }
}
