//! single-page streaming markdown chat against an openai-compatible backend.
//! - prompt pane on the left: type a markdown task or question, enter (or the
//!   submit button) sends it; the button goes inert and reads "generating..."
//!   while a stream is in flight.
//! - response pane on the right: re-rendered from `ChatState::rendered()` on
//!   every buffer update, so math delimiters arrive already normalized.
//!
//! configuration comes from the environment: `LLM_BASE_URL`, `OPENAI_API_KEY`,
//! `LLM_MODEL` (defaults to the original app's gpt-4o-mini snapshot).

use bevy::input::keyboard::{KeyCode, KeyboardInput};
use bevy::prelude::*;
use bevy_markdown_chat::{
    ChatConfig, ChatSet, ChatState, MarkdownChatPlugin, StreamProvider, SubmitPrompt,
};

const DEFAULT_MODEL: &str = "gpt-4o-mini-2024-07-18";

/// provider requires base to include `/v1` (this avoids 404s on chat endpoints).
fn normalize_oai_base(base: &str) -> String {
    let b = base.trim_end_matches('/');
    if b.ends_with("/v1") {
        b.to_string()
    } else {
        format!("{}/v1", b)
    }
}

// ---------------------- ui tags ----------------------

#[derive(Component)]
struct PromptText;
#[derive(Component)]
struct OutputText;
#[derive(Component)]
struct BtnSubmit;
#[derive(Component)]
struct BtnSubmitLabel;

// ---------------------- main ----------------------

fn main() {
    let base_url =
        std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

    let config = ChatConfig {
        base_url: normalize_oai_base(&base_url),
        api_key,
        model,
    };
    let provider = StreamProvider::from_config(&config).expect("build provider");

    App::new()
        .insert_resource(ClearColor(Color::srgb_u8(18, 18, 20)))
        .insert_resource(config)
        .insert_resource(provider)
        .add_plugins(DefaultPlugins)
        .add_plugins(MarkdownChatPlugin)
        .add_systems(Startup, setup)
        .add_systems(Update, (handle_text_input, btn_submit))
        // ui refresh runs after the plugin has applied this frame's deltas
        .add_systems(
            Update,
            (refresh_prompt_text, refresh_output_text, refresh_submit_button)
                .after(ChatSet::Drain),
        )
        .run();
}

// ---------------------- setup ui ----------------------

fn setup(mut commands: Commands) {
    commands.spawn(Camera2d::default());

    let style_18 = TextFont {
        font_size: 18.0,
        ..default()
    };
    let style_14 = TextFont {
        font_size: 14.0,
        ..default()
    };

    // root: header over a two-pane row
    commands
        .spawn((
            Node {
                width: Val::Percent(100.0),
                height: Val::Percent(100.0),
                flex_direction: FlexDirection::Column,
                row_gap: Val::Px(8.0),
                padding: UiRect::all(Val::Px(12.0)),
                ..default()
            },
            BackgroundColor(Color::NONE),
        ))
        .with_children(|p| {
            p.spawn((
                Text::new("streaming llm markdown formatting"),
                style_18.clone(),
                TextColor(Color::WHITE),
            ));

            p.spawn((
                Node {
                    width: Val::Percent(100.0),
                    height: Val::Percent(100.0),
                    flex_direction: FlexDirection::Row,
                    column_gap: Val::Px(12.0),
                    ..default()
                },
                BackgroundColor(Color::NONE),
            ))
            .with_children(|row| {
                // --- prompt pane ---
                row.spawn((
                    Node {
                        width: Val::Percent(50.0),
                        height: Val::Percent(100.0),
                        flex_direction: FlexDirection::Column,
                        row_gap: Val::Px(8.0),
                        padding: UiRect::all(Val::Px(8.0)),
                        ..default()
                    },
                    BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
                ))
                .with_children(|pane| {
                    pane.spawn((
                        Text::new("prompt input"),
                        style_14.clone(),
                        TextColor(Color::srgb_u8(160, 160, 170)),
                    ));
                    pane.spawn((
                        Text::new("> "),
                        style_18.clone(),
                        TextColor(Color::WHITE),
                        PromptText,
                    ));
                    pane.spawn((
                        Button,
                        Node {
                            width: Val::Px(140.0),
                            height: Val::Px(32.0),
                            align_items: AlignItems::Center,
                            justify_content: JustifyContent::Center,
                            ..default()
                        },
                        BackgroundColor(Color::srgb(0.31, 0.27, 0.90)),
                        BtnSubmit,
                    ))
                    .with_children(|b| {
                        b.spawn((
                            Text::new("submit"),
                            style_14.clone(),
                            TextColor(Color::WHITE),
                            BtnSubmitLabel,
                        ));
                    });
                });

                // --- response pane ---
                row.spawn((
                    Node {
                        width: Val::Percent(50.0),
                        height: Val::Percent(100.0),
                        flex_direction: FlexDirection::Column,
                        row_gap: Val::Px(8.0),
                        padding: UiRect::all(Val::Px(8.0)),
                        ..default()
                    },
                    BackgroundColor(Color::srgb(0.10, 0.10, 0.12)),
                ))
                .with_children(|pane| {
                    pane.spawn((
                        Text::new("response (formatted)"),
                        style_14.clone(),
                        TextColor(Color::srgb_u8(160, 160, 170)),
                    ));
                    pane.spawn((
                        Text::new(""),
                        style_18.clone(),
                        TextColor(Color::srgb_u8(220, 220, 220)),
                        OutputText,
                    ));
                });
            });
        });
}

// ---------------------- input & submit ----------------------

fn handle_text_input(
    mut ev_kbd: EventReader<KeyboardInput>,
    keys: Res<ButtonInput<KeyCode>>,
    mut state: ResMut<ChatState>,
    mut ev_submit: EventWriter<SubmitPrompt>,
) {
    for ev in ev_kbd.read() {
        if ev.state.is_pressed() {
            if let Some(txt) = &ev.text {
                let s = txt.replace('\r', "").replace('\n', "");
                if !s.is_empty() {
                    state.prompt_mut().push_str(&s);
                }
            }
        }
    }

    if keys.just_pressed(KeyCode::Backspace) {
        state.prompt_mut().pop();
    }

    // enter submits; the plugin rejects it anyway while busy, this just keeps
    // the trigger disabled at the ui level as well
    if keys.just_pressed(KeyCode::Enter) && !state.is_busy() {
        info!(target: "chat_example", "enter -> submit (prompt_len={})", state.prompt().len());
        ev_submit.write(SubmitPrompt);
    }
}

fn btn_submit(
    mut q: Query<(&Interaction, &mut BackgroundColor), (Changed<Interaction>, With<BtnSubmit>)>,
    state: Res<ChatState>,
    mut ev_submit: EventWriter<SubmitPrompt>,
) {
    for (i, mut bg) in &mut q {
        match *i {
            Interaction::Pressed => {
                if state.is_busy() {
                    continue;
                }
                bg.0 = Color::srgb(0.38, 0.34, 0.95);
                info!(target: "chat_example", "submit clicked (prompt_len={})", state.prompt().len());
                ev_submit.write(SubmitPrompt);
            }
            Interaction::Hovered => bg.0 = Color::srgb(0.35, 0.31, 0.92),
            Interaction::None => bg.0 = Color::srgb(0.31, 0.27, 0.90),
        }
    }
}

// ---------------------- text refresh ----------------------

fn refresh_prompt_text(state: Res<ChatState>, mut q: Query<&mut Text, With<PromptText>>) {
    if state.is_changed() {
        if let Ok(mut t) = q.single_mut() {
            t.0 = format!("> {}|", state.prompt());
        }
    }
}

/// hands the normalized buffer to the display on every state change; the
/// markdown/katex/highlight renderer stays a black box behind this string.
fn refresh_output_text(state: Res<ChatState>, mut q: Query<&mut Text, With<OutputText>>) {
    if state.is_changed() {
        if let Ok(mut t) = q.single_mut() {
            t.0 = state.rendered();
        }
    }
}

fn refresh_submit_button(state: Res<ChatState>, mut q: Query<&mut Text, With<BtnSubmitLabel>>) {
    if state.is_changed() {
        if let Ok(mut t) = q.single_mut() {
            t.0 = if state.is_busy() {
                "generating...".to_string()
            } else {
                "submit".to_string()
            };
        }
    }
}
