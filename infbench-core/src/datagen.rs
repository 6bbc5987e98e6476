use std::sync::Arc;

use rand::SeedableRng as _;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::api::{ApiKind, ChatMessage, RequestDescriptor};
use crate::distribution::{DistributionSpec, sample_lengths};
use crate::error::{Error, Result};
use crate::tokenizer::Tokenizer;

/// Produces the request stream a run consumes. Generators are lazy and may be
/// infinite or bounded by their distribution arrays; callers must check the
/// capability flags before assuming behavior.
pub trait WorkloadGenerator: Send {
    fn supported_apis(&self) -> &[ApiKind];

    /// Whether prompt and output lengths are independently controlled.
    fn supports_io_distribution(&self) -> bool;

    /// Whether prompts share a common prefix for prefix-cache benchmarks.
    fn supports_shared_prefix(&self) -> bool;

    /// Next request, or `None` once the generator is exhausted.
    fn next_descriptor(&mut self) -> Option<RequestDescriptor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataGenKind {
    Synthetic,
    Mock,
}

/// Synthetic generator: slices a single pre-tokenized reference corpus at
/// sampled offsets so each prompt's measured token length equals the sampled
/// input length. The corpus is tokenized once at construction and reused for
/// the process lifetime.
pub struct SyntheticGenerator {
    tokenizer: Arc<dyn Tokenizer>,
    corpus_ids: Vec<u32>,
    input_lengths: Vec<u64>,
    output_lengths: Vec<u64>,
    next: usize,
}

impl SyntheticGenerator {
    const SUPPORTED: &'static [ApiKind] = &[ApiKind::Completion];

    pub fn new(
        api: ApiKind,
        input: Option<DistributionSpec>,
        output: Option<DistributionSpec>,
        tokenizer: Arc<dyn Tokenizer>,
        seed: Option<u64>,
    ) -> Result<Self> {
        if !Self::SUPPORTED.contains(&api) {
            return Err(Error::UnsupportedApi(api));
        }
        let (input, output) = match (input, output) {
            (Some(i), Some(o)) => (i, o),
            _ => return Err(Error::MissingDistribution),
        };

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let input_lengths = sample_lengths(&input, &mut rng)?;
        let output_lengths = sample_lengths(&output, &mut rng)?;

        let corpus = format!(
            "Pick as many lines as you can from these poem lines:\n{}",
            reference_corpus()
        );
        let corpus_ids = tokenizer.encode(&corpus);
        if (corpus_ids.len() as u64) < input.max {
            return Err(Error::CorpusTooShort {
                corpus: corpus_ids.len(),
                required: input.max,
            });
        }

        Ok(Self {
            tokenizer,
            corpus_ids,
            input_lengths,
            output_lengths,
            next: 0,
        })
    }
}

impl WorkloadGenerator for SyntheticGenerator {
    fn supported_apis(&self) -> &[ApiKind] {
        Self::SUPPORTED
    }

    fn supports_io_distribution(&self) -> bool {
        true
    }

    fn supports_shared_prefix(&self) -> bool {
        false
    }

    fn next_descriptor(&mut self) -> Option<RequestDescriptor> {
        let i = self.next;
        if i >= self.input_lengths.len() || i >= self.output_lengths.len() {
            return None;
        }
        self.next += 1;

        let input_len = self.input_lengths[i] as usize;
        let prompt = self.tokenizer.decode(&self.corpus_ids[..input_len]);
        Some(RequestDescriptor::Completion {
            prompt,
            max_tokens: self.output_lengths[i],
        })
    }
}

/// Fixed-prompt generator without length control. Supports both API kinds
/// and never runs out; useful for smoke runs against a live endpoint.
pub struct MockGenerator {
    api: ApiKind,
    max_tokens: u64,
}

impl MockGenerator {
    const SUPPORTED: &'static [ApiKind] = &[ApiKind::Completion, ApiKind::Chat];
    const PROMPT: &'static str = "Write as long a story as possible.";

    pub fn new(api: ApiKind, max_tokens: u64) -> Self {
        Self { api, max_tokens }
    }
}

impl WorkloadGenerator for MockGenerator {
    fn supported_apis(&self) -> &[ApiKind] {
        Self::SUPPORTED
    }

    fn supports_io_distribution(&self) -> bool {
        false
    }

    fn supports_shared_prefix(&self) -> bool {
        false
    }

    fn next_descriptor(&mut self) -> Option<RequestDescriptor> {
        Some(match self.api {
            ApiKind::Completion => RequestDescriptor::Completion {
                prompt: Self::PROMPT.to_string(),
                max_tokens: self.max_tokens,
            },
            ApiKind::Chat => RequestDescriptor::Chat {
                messages: vec![ChatMessage::user(Self::PROMPT)],
                max_tokens: self.max_tokens,
            },
        })
    }
}

// Hardcoded sonnet data used as the synthetic reference corpus.
fn reference_corpus() -> &'static str {
    "FROM fairest creatures we desire increase,
That thereby beauty's rose might never die,
But as the riper should by time decease,
His tender heir might bear his memory:
But thou, contracted to thine own bright eyes,
Feed'st thy light'st flame with self-substantial fuel,
Making a famine where abundance lies,
Thyself thy foe, to thy sweet self too cruel.
Thou that art now the world's fresh ornament
And only herald to the gaudy spring,
Within thine own bud buriest thy content
And, tender churl, makest waste in niggarding.
Pity the world, or else this glutton be,
To eat the world's due, by the grave and thee.
When forty winters shall beseige thy brow,
And dig deep trenches in thy beauty's field,
Thy youth's proud livery, so gazed on now,
Will be a tatter'd weed, of small worth held:
Then being ask'd where all thy beauty lies,
Where all the treasure of thy lusty days,
To say, within thine own deep-sunken eyes,
Were an all-eating shame and thriftless praise.
How much more praise deserved thy beauty's use,
If thou couldst answer 'This fair child of mine
Shall sum my count and make my old excuse,'
Proving his beauty by succession thine!
This were to be new made when thou art old,
And see thy blood warm when thou feel'st it cold.
Look in thy glass, and tell the face thou viewest
Now is the time that face should form another;
Whose fresh repair if now thou not renewest,
Thou dost beguile the world, unbless some mother.
For where is she so fair whose unear'd womb
Disdains the tillage of thy husbandry?
Or who is he so fond will be the tomb
Of his self-love, to stop posterity?
Thou art thy mother's glass, and she in thee
Calls back the lovely April of her prime:
So thou through windows of thine age shall see
Despite of wrinkles this thy golden time.
But if thou live, remember'd not to be,
Die single, and thine image dies with thee.
Unthrifty loveliness, why dost thou spend
Upon thyself thy beauty's legacy?
Nature's bequest gives nothing but doth lend,
And being frank she lends to those are free.
Then, beauteous niggard, why dost thou abuse
The bounteous largess given thee to give?
Profitless usurer, why dost thou use
So great a sum of sums, yet canst not live?
For having traffic with thyself alone,
Thou of thyself thy sweet self dost deceive.
Then how, when nature calls thee to be gone,
What acceptable audit canst thou leave?
Thy unused beauty must be tomb'd with thee,
Which, used, lives th' executor to be.
Those hours, that with gentle work did frame
The lovely gaze where every eye doth dwell,
Will play the tyrants to the very same
And that unfair which fairly doth excel:
For never-resting time leads summer on
To hideous winter and confounds him there;
Sap cheque'd with frost and lusty leaves quite gone,
Beauty o'ersnow'd and bareness every where:
Then, were not summer's distillation left,
A liquid prisoner pent in walls of glass,
Beauty's effect with beauty were bereft,
Nor it nor no remembrance what it was:
But flowers distill'd though they with winter meet,
Leese but their show; their substance still lives sweet.
Then let not winter's ragged hand deface
In thee thy summer, ere thou be distill'd:
Make sweet some vial; treasure thou some place
With beauty's treasure, ere it be self-kill'd.
That use is not forbidden usury,
Which happies those that pay the willing loan;
That's for thyself to breed another thee,
Or ten times happier, be it ten for one;
Ten times thyself were happier than thou art,
If ten of thine ten times refigured thee:
Then what could death do, if thou shouldst depart,
Leaving thee living in posterity?
Be not self-will'd, for thou art much too fair
To be death's conquest and make worms thine heir.
Lo! in the orient when the gracious light
Lifts up his burning head, each under eye
Doth homage to his new-appearing sight,
Serving with looks his sacred majesty;
And having climb'd the steep-up heavenly hill,
Resembling strong youth in his middle age,
yet mortal looks adore his beauty still,
Attending on his golden pilgrimage;
But when from highmost pitch, with weary car,
Like feeble age, he reeleth from the day,
The eyes, 'fore duteous, now converted are
From his low tract and look another way:
So thou, thyself out-going in thy noon,
Unlook'd on diest, unless thou get a son.
Music to hear, why hear'st thou music sadly?
Sweets with sweets war not, joy delights in joy.
Why lovest thou that which thou receivest not gladly,
Or else receivest with pleasure thine annoy?
If the true concord of well-tuned sounds,
By unions married, do offend thine ear,
They do but sweetly chide thee, who confounds
In singleness the parts that thou shouldst bear.
Mark how one string, sweet husband to another,
Strikes each in each by mutual ordering,
Resembling sire and child and happy mother
Who all in one, one pleasing note do sing:
Whose speechless song, being many, seeming one,
Sings this to thee: 'thou single wilt prove none.'
Is it for fear to wet a widow's eye
That thou consumest thyself in single life?
Ah! if thou issueless shalt hap to die.
The world will wail thee, like a makeless wife;
The world will be thy widow and still weep
That thou no form of thee hast left behind,
When every private widow well may keep
By children's eyes her husband's shape in mind.
Look, what an unthrift in the world doth spend
Shifts but his place, for still the world enjoys it;
But beauty's waste hath in the world an end,
And kept unused, the user so destroys it.
No love toward others in that bosom sits
That on himself such murderous shame commits.
For shame! deny that thou bear'st love to any,
Who for thyself art so unprovident.
Grant, if thou wilt, thou art beloved of many,
But that thou none lovest is most evident;
For thou art so possess'd with murderous hate
That 'gainst thyself thou stick'st not to conspire.
Seeking that beauteous roof to ruinate
Which to repair should be thy chief desire.
O, change thy thought, that I may change my mind!
Shall hate be fairer lodged than gentle love?
Be, as thy presence is, gracious and kind,
Or to thyself at least kind-hearted prove:
Make thee another self, for love of me,
That beauty still may live in thine or thee."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;

    fn specs(total_count: usize) -> (DistributionSpec, DistributionSpec) {
        (
            DistributionSpec {
                min: 10,
                max: 100,
                mean: 50.0,
                std_dev: 20.0,
                total_count,
            },
            DistributionSpec {
                min: 5,
                max: 60,
                mean: 30.0,
                std_dev: 10.0,
                total_count,
            },
        )
    }

    #[test]
    fn rejects_unsupported_api() {
        let (input, output) = specs(8);
        let err = SyntheticGenerator::new(
            ApiKind::Chat,
            Some(input),
            Some(output),
            Arc::new(WhitespaceTokenizer::new()),
            Some(1),
        );
        assert!(matches!(err, Err(Error::UnsupportedApi(ApiKind::Chat))));
    }

    #[test]
    fn rejects_missing_distributions() {
        let err = SyntheticGenerator::new(
            ApiKind::Completion,
            None,
            None,
            Arc::new(WhitespaceTokenizer::new()),
            Some(1),
        );
        assert!(matches!(err, Err(Error::MissingDistribution)));
    }

    #[test]
    fn capability_flags_match_construction_rules() {
        let (input, output) = specs(4);
        let generator = SyntheticGenerator::new(
            ApiKind::Completion,
            Some(input),
            Some(output),
            Arc::new(WhitespaceTokenizer::new()),
            Some(1),
        )
        .unwrap_or_else(|e| panic!("construction failed: {e}"));

        assert!(generator.supports_io_distribution());
        assert!(!generator.supports_shared_prefix());
        assert_eq!(generator.supported_apis(), &[ApiKind::Completion]);
    }

    #[test]
    fn measured_token_lengths_equal_sampled_values() {
        let tokenizer = Arc::new(WhitespaceTokenizer::new());
        let (input, output) = specs(1000);
        let mut generator = SyntheticGenerator::new(
            ApiKind::Completion,
            Some(input),
            Some(output),
            tokenizer.clone(),
            Some(9),
        )
        .unwrap_or_else(|e| panic!("construction failed: {e}"));

        let expected = generator.input_lengths.clone();
        for (i, want) in expected.iter().enumerate() {
            let descriptor = generator
                .next_descriptor()
                .unwrap_or_else(|| panic!("generator exhausted at {i}"));
            match descriptor {
                RequestDescriptor::Completion { prompt, .. } => {
                    assert_eq!(tokenizer.count_tokens(&prompt) as u64, *want, "request {i}");
                }
                other => panic!("unexpected descriptor: {other:?}"),
            }
        }
        assert!(generator.next_descriptor().is_none(), "bounded by total_count");
    }

    #[test]
    fn mock_generator_is_infinite_and_supports_chat() {
        let mut generator = MockGenerator::new(ApiKind::Chat, 64);
        assert!(!generator.supports_io_distribution());
        for _ in 0..1000 {
            let d = generator.next_descriptor();
            assert!(matches!(d, Some(RequestDescriptor::Chat { .. })));
        }
    }
}
