use serde::{Deserialize, Serialize};

use crate::bson::{Document, Timestamp};

/// Struct modeling a cluster time reported by the server: a signed logical timestamp the
/// deployment advances monotonically.
///
/// Cluster times gossip through every command and reply; the driver forwards the highest one
/// it has seen and never inspects the signature.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub(crate) cluster_time: Timestamp,

    pub(crate) signature: Document,
}

impl PartialEq for ClusterTime {
    fn eq(&self, other: &Self) -> bool {
        // The signature authenticates the timestamp server-side; ordering and equality are
        // determined by the timestamp alone.
        self.cluster_time == other.cluster_time
    }
}

impl Eq for ClusterTime {}

impl std::cmp::Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        let lhs = (self.cluster_time.time, self.cluster_time.increment);
        let rhs = (other.cluster_time.time, other.cluster_time.increment);
        lhs.cmp(&rhs)
    }
}

impl std::cmp::PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod test {
    use super::ClusterTime;
    use crate::{bson::Timestamp, doc};

    fn cluster_time(time: u32, increment: u32) -> ClusterTime {
        ClusterTime {
            cluster_time: Timestamp { time, increment },
            signature: doc! { "keyId": 1i64 },
        }
    }

    #[test]
    fn ordering_is_lexicographic_on_time_and_increment() {
        assert!(cluster_time(1, 1) < cluster_time(1, 2));
        assert!(cluster_time(1, 2) < cluster_time(2, 0));
        assert_eq!(cluster_time(3, 4), cluster_time(3, 4));
        // Signatures do not participate in comparisons.
        let mut other = cluster_time(3, 4);
        other.signature = doc! { "keyId": 99i64 };
        assert_eq!(cluster_time(3, 4), other);
    }
}
