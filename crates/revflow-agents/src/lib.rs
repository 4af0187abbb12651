pub mod ai;
pub mod analyzer;
pub mod doc_updater;
pub mod prompt;
pub mod reviewer;
pub mod synthesizer;
pub mod test_generator;

pub use ai::AiClient;
pub use analyzer::AnalyzerAgent;
pub use doc_updater::DocUpdaterAgent;
pub use reviewer::ReviewerAgent;
pub use synthesizer::SynthesizerAgent;
pub use test_generator::TestGeneratorAgent;
