//! Request differentiation: turning classifier tuples into routing tokens.
//!
//! Differentiation happens twice per request. The core hashes up to three
//! classifiers (workflow, operation type, operation context) to pick a
//! channel; the channel hashes up to two (operation type, operation
//! context) to pick an enforcement object. Both sides must build tokens
//! from the same classifier subset for routing to line up, so builders
//! stage classifier changes and only apply them on `bind_builder`.

pub mod murmur;

use crate::options;

/// Hashing scheme backing a token builder. The 32-bit scheme is the
/// routing default; the 128-bit variants are reserved for wider tokens and
/// are truncated when used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashingScheme {
    MurmurX86_32,
    MurmurX86_128,
    MurmurX64_128,
}

/// Seeded hash dispatcher producing 32-bit differentiation tokens.
#[derive(Debug, Clone, Copy)]
pub struct TokenBuilder {
    scheme: HashingScheme,
    seed: u32,
}

impl TokenBuilder {
    pub fn new(scheme: HashingScheme) -> TokenBuilder {
        TokenBuilder {
            scheme,
            seed: options::DEFAULT_TOKEN_SEED,
        }
    }

    pub fn generate(&self, message: &[u8]) -> u32 {
        match self.scheme {
            HashingScheme::MurmurX86_32 => murmur::murmur3_x86_32(message, self.seed),
            HashingScheme::MurmurX86_128 => murmur::murmur3_x86_128(message, self.seed)[0],
            HashingScheme::MurmurX64_128 => murmur::murmur3_x64_128(message, self.seed)[0] as u32,
        }
    }
}

impl Default for TokenBuilder {
    fn default() -> Self {
        TokenBuilder::new(HashingScheme::MurmurX86_32)
    }
}

/// Classifier values considered for channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDifferentiationTuple {
    pub workflow_id: u32,
    pub operation_type: u32,
    pub operation_context: u32,
}

impl ChannelDifferentiationTuple {
    pub fn new(workflow_id: u32, operation_type: u32, operation_context: u32) -> Self {
        ChannelDifferentiationTuple {
            workflow_id,
            operation_type,
            operation_context,
        }
    }
}

/// Classifier values considered for enforcement-object selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectDifferentiationPair {
    pub operation_type: u32,
    pub operation_context: u32,
}

impl ObjectDifferentiationPair {
    pub fn new(operation_type: u32, operation_context: u32) -> Self {
        ObjectDifferentiationPair {
            operation_type,
            operation_context,
        }
    }
}

/// Builds channel routing tokens from the active classifier subset.
#[derive(Debug, Clone)]
pub struct ChannelDifferentiationBuilder {
    pending: (bool, bool, bool),
    bound: (bool, bool, bool),
    token_builder: TokenBuilder,
}

impl ChannelDifferentiationBuilder {
    pub fn new(token_builder: TokenBuilder) -> Self {
        let classifiers = options::DEFAULT_CHANNEL_CLASSIFIERS;
        ChannelDifferentiationBuilder {
            pending: classifiers,
            bound: classifiers,
            token_builder,
        }
    }

    /// Select which classifiers participate. Takes effect at the next
    /// `bind_builder` call.
    pub fn set_classifiers(&mut self, workflow: bool, operation_type: bool, operation_context: bool) {
        self.pending = (workflow, operation_type, operation_context);
    }

    /// Apply the staged classifier selection to the token dispatch.
    pub fn bind_builder(&mut self) {
        self.bound = self.pending;
    }

    pub fn build_token(&self, tuple: &ChannelDifferentiationTuple) -> u32 {
        // At most three active selectors, four bytes each.
        let mut message = [0u8; 12];
        let mut length = 0;
        let (workflow, operation_type, operation_context) = self.bound;
        if workflow {
            message[length..length + 4].copy_from_slice(&tuple.workflow_id.to_le_bytes());
            length += 4;
        }
        if operation_type {
            message[length..length + 4].copy_from_slice(&tuple.operation_type.to_le_bytes());
            length += 4;
        }
        if operation_context {
            message[length..length + 4].copy_from_slice(&tuple.operation_context.to_le_bytes());
            length += 4;
        }
        self.token_builder.generate(&message[..length])
    }
}

impl Default for ChannelDifferentiationBuilder {
    fn default() -> Self {
        ChannelDifferentiationBuilder::new(TokenBuilder::default())
    }
}

/// Builds enforcement-object tokens from the active classifier subset.
#[derive(Debug, Clone)]
pub struct ObjectDifferentiationBuilder {
    pending: (bool, bool),
    bound: (bool, bool),
    token_builder: TokenBuilder,
}

impl ObjectDifferentiationBuilder {
    pub fn new(token_builder: TokenBuilder) -> Self {
        let classifiers = options::DEFAULT_OBJECT_CLASSIFIERS;
        ObjectDifferentiationBuilder {
            pending: classifiers,
            bound: classifiers,
            token_builder,
        }
    }

    pub fn set_classifiers(&mut self, operation_type: bool, operation_context: bool) {
        self.pending = (operation_type, operation_context);
    }

    pub fn bind_builder(&mut self) {
        self.bound = self.pending;
    }

    pub fn build_token(&self, pair: &ObjectDifferentiationPair) -> u32 {
        let mut message = [0u8; 8];
        let mut length = 0;
        let (operation_type, operation_context) = self.bound;
        if operation_type {
            message[length..length + 4].copy_from_slice(&pair.operation_type.to_le_bytes());
            length += 4;
        }
        if operation_context {
            message[length..length + 4].copy_from_slice(&pair.operation_context.to_le_bytes());
            length += 4;
        }
        self.token_builder.generate(&message[..length])
    }
}

impl Default for ObjectDifferentiationBuilder {
    fn default() -> Self {
        ObjectDifferentiationBuilder::new(TokenBuilder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_pure_in_the_tuple() {
        let mut builder = ChannelDifferentiationBuilder::default();
        builder.set_classifiers(true, true, true);
        builder.bind_builder();

        let tuple = ChannelDifferentiationTuple::new(7, 1, 2);
        assert_eq!(builder.build_token(&tuple), builder.build_token(&tuple));

        let other = ChannelDifferentiationTuple::new(8, 1, 2);
        assert_ne!(builder.build_token(&tuple), builder.build_token(&other));
    }

    #[test]
    fn inactive_classifiers_do_not_participate() {
        let mut builder = ChannelDifferentiationBuilder::default();
        builder.set_classifiers(true, false, false);
        builder.bind_builder();

        let a = ChannelDifferentiationTuple::new(7, 1, 2);
        let b = ChannelDifferentiationTuple::new(7, 9, 9);
        assert_eq!(builder.build_token(&a), builder.build_token(&b));
    }

    #[test]
    fn classifier_changes_wait_for_bind() {
        let mut builder = ObjectDifferentiationBuilder::default();
        builder.set_classifiers(true, false);
        builder.bind_builder();

        let pair = ObjectDifferentiationPair::new(3, 4);
        let before = builder.build_token(&pair);

        builder.set_classifiers(true, true);
        assert_eq!(builder.build_token(&pair), before);

        builder.bind_builder();
        assert_ne!(builder.build_token(&pair), before);
    }

    #[test]
    fn zero_active_classifiers_still_produce_a_token() {
        let mut builder = ObjectDifferentiationBuilder::default();
        builder.set_classifiers(false, false);
        builder.bind_builder();

        let a = ObjectDifferentiationPair::new(1, 2);
        let b = ObjectDifferentiationPair::new(3, 4);
        assert_eq!(builder.build_token(&a), builder.build_token(&b));
    }

    #[test]
    fn schemes_disagree_but_are_each_stable() {
        let x86 = TokenBuilder::new(HashingScheme::MurmurX86_32);
        let x64 = TokenBuilder::new(HashingScheme::MurmurX64_128);
        let message = b"routing-key";
        assert_eq!(x86.generate(message), x86.generate(message));
        assert_eq!(x64.generate(message), x64.generate(message));
    }
}
