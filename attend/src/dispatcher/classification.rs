use serde::Serialize;

use crate::{
    config::{AttentionInputType, RequestType},
    error::ShapeError,
    runner::{Phase, PhaseSpan},
};

/// Split of a packed batch into its leading context requests and the
/// generation requests that follow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchClassification {
    pub num_seqs: usize,
    pub num_contexts: usize,
    pub num_generations: usize,
    pub num_tokens: usize,
    pub num_ctx_tokens: usize,
    pub num_gen_tokens: usize,
    /// First token row of the generation requests.
    pub generation_token_offset: usize,
    pub input_type: AttentionInputType,
}

impl BatchClassification {
    pub fn classify(
        request_types: &[RequestType],
        host_context_lengths: &[i32],
        num_tokens: usize,
        input_type: AttentionInputType,
    ) -> Result<Self, ShapeError> {
        let num_seqs = host_context_lengths.len();
        if request_types.len() != num_seqs {
            return Err(ShapeError::LengthMismatch {
                what: "host request types",
                expected: num_seqs,
                actual: request_types.len(),
            });
        }

        let num_contexts = request_types
            .iter()
            .take_while(|&&request_type| request_type == RequestType::Context)
            .count();
        if let Some(offset) = request_types[num_contexts..]
            .iter()
            .position(|&request_type| request_type == RequestType::Context)
        {
            return Err(ShapeError::RequestOrder {
                index: num_contexts + offset,
            });
        }

        let num_ctx_tokens =
            host_context_lengths[..num_contexts].iter().try_fold(0usize, |total, &length| {
                usize::try_from(length).map(|length| total + length).map_err(|_| {
                    ShapeError::NegativeValue {
                        what: "context length",
                        value: i64::from(length),
                    }
                })
            })?;

        let generation_only = input_type == AttentionInputType::GenerationOnly;
        let (num_gen_tokens, generation_token_offset) = if generation_only {
            (num_tokens, 0)
        } else {
            let num_gen_tokens = num_tokens.checked_sub(num_ctx_tokens).ok_or(
                ShapeError::ContextTokensExceedTotal {
                    num_ctx_tokens,
                    num_tokens,
                },
            )?;
            (num_gen_tokens, num_ctx_tokens)
        };

        Ok(Self {
            num_seqs,
            num_contexts,
            num_generations: num_seqs - num_contexts,
            num_tokens,
            num_ctx_tokens,
            num_gen_tokens,
            generation_token_offset,
            input_type,
        })
    }

    /// Phases to run, context first. Phases without requests or excluded by
    /// the input type are skipped.
    pub fn phases(
        &self,
        predicted_tokens_per_seq: usize,
    ) -> Vec<PhaseSpan> {
        let mut phases = Vec::with_capacity(2);
        if self.num_contexts > 0 && self.input_type.allows_context() {
            phases.push(PhaseSpan {
                phase: Phase::Context,
                seq_offset: 0,
                num_seqs: self.num_contexts,
                token_offset: 0,
                num_tokens: self.num_ctx_tokens,
                predicted_tokens_per_seq,
            });
        }
        if self.num_generations > 0 && self.input_type.allows_generation() {
            phases.push(PhaseSpan {
                phase: Phase::Generation,
                seq_offset: self.num_contexts,
                num_seqs: self.num_generations,
                token_offset: self.generation_token_offset,
                num_tokens: self.num_gen_tokens,
                predicted_tokens_per_seq,
            });
        }
        phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C: RequestType = RequestType::Context;
    const G: RequestType = RequestType::Generation;

    #[test]
    fn test_mixed_batch_counts() {
        let batch = BatchClassification::classify(
            &[C, C, C, G, G],
            &[4, 6, 2, 9, 9],
            14,
            AttentionInputType::Mixed,
        )
        .unwrap();
        assert_eq!(batch.num_contexts, 3);
        assert_eq!(batch.num_generations, 2);
        assert_eq!(batch.num_ctx_tokens, 12);
        assert_eq!(batch.num_gen_tokens, 2);
        assert_eq!(batch.num_contexts + batch.num_generations, batch.num_seqs);
        assert_eq!(batch.num_ctx_tokens + batch.num_gen_tokens, batch.num_tokens);

        let phases = batch.phases(1);
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].phase, Phase::Context);
        assert_eq!((phases[1].seq_offset, phases[1].token_offset), (3, 12));
    }

    #[test]
    fn test_context_after_generation_is_rejected() {
        assert_eq!(
            BatchClassification::classify(&[C, G, C], &[1, 1, 1], 3, AttentionInputType::Mixed),
            Err(ShapeError::RequestOrder {
                index: 2
            })
        );
    }

    #[test]
    fn test_phase_filters() {
        let batch = BatchClassification::classify(
            &[C, C, C, G, G],
            &[4, 6, 2, 9, 9],
            14,
            AttentionInputType::ContextOnly,
        )
        .unwrap();
        let phases = batch.phases(1);
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].phase, Phase::Context);

        let generation_only =
            BatchClassification::classify(&[G, G], &[7, 7], 2, AttentionInputType::GenerationOnly).unwrap();
        assert_eq!(generation_only.num_gen_tokens, 2);
        let phases = generation_only.phases(1);
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].phase, Phase::Generation);
        assert_eq!(phases[0].token_offset, 0);
    }

    #[test]
    fn test_context_tokens_exceed_total() {
        assert!(matches!(
            BatchClassification::classify(&[C], &[10], 4, AttentionInputType::Mixed),
            Err(ShapeError::ContextTokensExceedTotal { .. })
        ));
        assert!(matches!(
            BatchClassification::classify(&[C], &[1, 2], 3, AttentionInputType::Mixed),
            Err(ShapeError::LengthMismatch { .. })
        ));
    }
}
