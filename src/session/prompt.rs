//! Builds the setup message that opens every live session: who the assistant
//! is, what the shop sells, which voice to use and which tools it may call.

use crate::config::{BusinessConfig, LiveConfig};
use crate::live::protocol::{
    Content, FunctionDeclaration, GenerationConfig, LiveSetup, PrebuiltVoiceConfig, SpeechConfig, Tool,
    TranscriptionConfig, VoiceConfig,
};
use crate::session::tools::{RECORD_LEAD, SCHEDULE_REPAIR};
use serde_json::json;

/// System prompt with the shop's details and price list.
pub fn system_prompt(business: &BusinessConfig) -> String {
    let mut prompt = format!(
        "You are the friendly front-desk assistant for {name}, a computer repair shop. \
         Answer questions about repairs, pricing and opening hours in short, natural spoken sentences.\n\n\
         Address: {address}\nHours: {hours}\nPhone: {phone}\n\nServices and prices:\n",
        name = business.name,
        address = business.address,
        hours = business.hours,
        phone = business.phone,
    );

    for service in &business.services {
        prompt.push_str(&format!("- {}: {}\n", service.name, service.price));
    }

    prompt.push_str(&format!(
        "\nWhen a caller describes a problem, collect their name, a phone number or email, \
         and a short description of the issue, then call `{lead}`. \
         When they want to bring a device in, agree on a date, a time and the service, \
         then call `{book}`. Never invent prices that are not listed; offer a free \
         diagnostic quote instead. If you cannot help, give them the phone number.",
        lead = RECORD_LEAD,
        book = SCHEDULE_REPAIR,
    ));
    prompt
}

fn string_params(fields: &[(&str, &str)]) -> serde_json::Value {
    let properties: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({ "type": "string", "description": description }),
            )
        })
        .collect();
    let required: Vec<&str> = fields.iter().map(|(name, _)| *name).collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Declarations of the two business tools.
pub fn tool_declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: RECORD_LEAD.to_string(),
            description: "Record a potential customer so the shop can follow up.".to_string(),
            parameters: string_params(&[
                ("name", "Customer's name"),
                ("contact", "Phone number or email address"),
                ("issue", "Short description of the device problem"),
            ]),
        },
        FunctionDeclaration {
            name: SCHEDULE_REPAIR.to_string(),
            description: "Book a drop-off appointment for a repair.".to_string(),
            parameters: string_params(&[
                ("date", "Appointment date"),
                ("time", "Appointment time"),
                ("service", "Service from the price list"),
            ]),
        },
    ]
}

/// The complete setup message for a new session.
pub fn build_setup(live: &LiveConfig, business: &BusinessConfig) -> LiveSetup {
    LiveSetup {
        model: live.model.clone(),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: live.voice.clone(),
                    },
                },
            },
        },
        system_instruction: Content::plain(system_prompt(business)),
        tools: vec![Tool {
            function_declarations: tool_declarations(),
        }],
        input_audio_transcription: TranscriptionConfig::default(),
        output_audio_transcription: TranscriptionConfig::default(),
    }
}
