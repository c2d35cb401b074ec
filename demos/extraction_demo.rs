use std::sync::Arc;

use lexextract::logging::{init_progress_handler, ConsoleProgressHandler};
use lexextract::{extract, Document, ExtractorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    dotenvy::dotenv().ok();
    init_progress_handler(Arc::new(ConsoleProgressHandler::verbose()));

    let source_text = r#"
UNITED STATES DISTRICT COURT
NORTHERN DISTRICT OF CALIFORNIA

ACME CORPORATION, Plaintiff, v. GLOBEX INDUSTRIES, INC., Defendant.

Case No. 3:24-cv-01234

ORDER GRANTING IN PART AND DENYING IN PART MOTION TO DISMISS

Before the Court is Defendant's motion to dismiss under Rule 12(b)(6).
Plaintiff Acme Corporation filed this action on March 4, 2024, alleging
breach of contract and violations of 15 U.S.C. § 1125(a). The parties
entered into a Supply Agreement effective January 1, 2023.

In Bell Atlantic Corp. v. Twombly, 550 U.S. 544 (2007), the Supreme Court
held that a complaint must allege sufficient facts to state a claim that is
plausible on its face. Applying Twombly, the Court finds the contract claim
adequately pleaded. The hearing was held on June 18, 2024, before the
Honorable Maria Chen. Sarah Johnson of Johnson & Associates LLP represents
the plaintiff; the defendant is represented by David Park, Esq.

Plaintiff seeks damages of $2,500,000 together with attorney fees.
The motion is GRANTED as to the Lanham Act claim and DENIED as to the
contract claim. A case management conference is set for September 9, 2024.
"#;

    println!("Extracting from a {}-char court order\n", source_text.len());

    // Endpoints and thresholds come from LEXEXTRACT_* environment variables
    // when set; defaults point at a local backend.
    let config = ExtractorConfig::from_env().unwrap_or_default();
    let document = Document::new(source_text.trim());

    let result = extract(&document, &config, true).await?;

    println!("\nStrategy: {:?} ({} waves)", result.strategy, result.waves_executed);
    println!("Tokens used: {}", result.tokens_used);
    println!("Processing time: {:.2}s\n", result.processing_time);

    println!("Entities ({}):", result.entities.len());
    for entity in &result.entities {
        match (entity.start_pos, entity.end_pos) {
            (Some(start), Some(end)) => {
                println!("  {:<24} {:?} ({start}..{end})", entity.entity_type, entity.text)
            }
            _ => println!("  {:<24} {:?}", entity.entity_type, entity.text),
        }
    }

    println!("\nRelationships ({}):", result.relationships.len());
    for rel in &result.relationships {
        println!(
            "  {} --{}--> {} ({:.2})",
            rel.source_entity_id, rel.relationship_type, rel.target_entity_id, rel.confidence
        );
        println!("    evidence: {:?}", rel.evidence_text);
    }

    Ok(())
}
