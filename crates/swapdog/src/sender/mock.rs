use super::*;
use bitcoin::consensus::encode::deserialize;
use std::collections::HashSet;
use std::sync::Mutex;

pub(crate) enum MockReply {
    Accept,
    Reject(String),
}

/// In-process relay that records submissions.
pub(crate) struct MockRelay {
    name: String,
    reply: MockReply,
    pub(crate) submitted: Mutex<Vec<Vec<u8>>>,
    pub(crate) known: Mutex<HashSet<Txid>>,
}

impl MockRelay {
    pub(crate) fn new(name: &str, reply: MockReply) -> Self {
        Self {
            name: name.to_string(),
            reply,
            submitted: Mutex::new(Vec::new()),
            known: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl TxBroadcaster for MockRelay {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, raw: &[u8]) -> Result<Txid> {
        self.submitted.lock().unwrap().push(raw.to_vec());
        match &self.reply {
            MockReply::Accept => {
                let tx: Transaction = deserialize(raw)?;
                let txid = tx.compute_txid();
                self.known.lock().unwrap().insert(txid);
                Ok(txid)
            }
            MockReply::Reject(msg) => Err(anyhow!("{}", msg)),
        }
    }

    async fn is_known(&self, txid: &Txid) -> Result<bool> {
        Ok(self.known.lock().unwrap().contains(txid))
    }
}
