use std::ops::Deref;

use crate::structs::versions::BUFRMessage;

/// A decoded message and where it started in its source.
#[derive(Clone, Debug)]
pub struct MessageBlock {
    offset: usize,
    message: BUFRMessage,
}

impl std::fmt::Display for MessageBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Offset: {}", self.offset)?;
        write!(f, "{}", self.message)
    }
}

impl Deref for MessageBlock {
    type Target = BUFRMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl MessageBlock {
    pub fn new(offset: usize, message: BUFRMessage) -> Self {
        MessageBlock { offset, message }
    }

    /// Byte offset of the `BUFR` marker.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn message(&self) -> &BUFRMessage {
        &self.message
    }

    pub fn into_message(self) -> BUFRMessage {
        self.message
    }
}

#[derive(Default, Debug)]
pub struct BUFRFile {
    messages: Vec<MessageBlock>,
}

impl BUFRFile {
    pub fn new() -> Self {
        BUFRFile {
            messages: Vec::new(),
        }
    }

    pub(crate) fn push_message(&mut self, offset: usize, message: BUFRMessage) {
        self.messages.push(MessageBlock::new(offset, message));
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn message_at(&self, index: usize) -> Option<&MessageBlock> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[MessageBlock] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageBlock> {
        self.messages.iter()
    }
}

impl IntoIterator for BUFRFile {
    type Item = MessageBlock;
    type IntoIter = std::vec::IntoIter<MessageBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a BUFRFile {
    type Item = &'a MessageBlock;
    type IntoIter = std::slice::Iter<'a, MessageBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
