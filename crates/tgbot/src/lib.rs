use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, ThreadId};
use tracing::warn;

pub struct TgBot {
    bot: Bot,
    chat_id: i64,
    sold_topic_id: i32,
    fraud_topic_id: i32,
}

impl TgBot {
    pub fn new(token: &str, chat_id: i64, sold_topic_id: i32, fraud_topic_id: i32) -> Self {
        Self {
            bot: Bot::new(token),
            chat_id,
            sold_topic_id,
            fraud_topic_id,
        }
    }

    pub async fn send_msg_to_topic(&self, topic_id: i32, msg: &str) -> Result<()> {
        let chat_id = ChatId(self.chat_id);
        let topic_id = ThreadId(MessageId(topic_id));
        self.bot
            .send_message(chat_id, msg)
            .message_thread_id(topic_id)
            .await?;
        Ok(())
    }

    /// Failures are logged and swallowed, a notification never fails a settlement.
    pub async fn notify_sold(&self, offer_id: &str, txid: &str, price_sats: u64) {
        let msg = sold_message(offer_id, txid, price_sats);
        if let Err(e) = self.send_msg_to_topic(self.sold_topic_id, &msg).await {
            warn!("sold notification for {} failed: {}", offer_id, e);
        }
    }

    pub async fn notify_fraud(&self, offer_id: &str, buyer: &str, reasons: &[String]) {
        let msg = fraud_message(offer_id, buyer, reasons);
        if let Err(e) = self.send_msg_to_topic(self.fraud_topic_id, &msg).await {
            warn!("fraud notification for {} failed: {}", offer_id, e);
        }
    }
}

pub fn sold_message(offer_id: &str, txid: &str, price_sats: u64) -> String {
    format!("✅ offer {offer_id} sold for {price_sats} sats\ntx: {txid}")
}

pub fn fraud_message(offer_id: &str, buyer: &str, reasons: &[String]) -> String {
    let mut msg = format!("🚨 rejected purchase of offer {offer_id}\nbuyer: {buyer}");
    for reason in reasons {
        msg.push_str("\n- ");
        msg.push_str(reason);
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraud_message_lists_every_reason() {
        let reasons = vec![
            "output 0 value changed".to_string(),
            "input 0 outpoint changed".to_string(),
        ];
        let msg = fraud_message("offer-1", "bc1pbuyer", &reasons);
        assert!(msg.contains("offer-1"));
        assert!(msg.contains("bc1pbuyer"));
        assert_eq!(msg.matches("\n- ").count(), 2);
    }

    #[test]
    fn sold_message_names_tx() {
        let msg = sold_message("offer-2", "abcd", 10_000);
        assert!(msg.contains("10000 sats"));
        assert!(msg.ends_with("tx: abcd"));
    }
}
