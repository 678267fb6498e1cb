//! The feedback and reply prompts.
//!
//! These texts are part of the system contract: the chat-state transition
//! probabilities, summary continuity and reply etiquette all live in here,
//! not in local code. The summary-continuity exemplars in particular are
//! load-bearing — models drift badly without them.

use crate::emotion::EmotionState;
use crate::memory::short_term::ChatMessage;
use crate::session::state::ChatState;

pub struct FeedbackPromptInput<'a> {
    pub name: &'a str,
    pub role: &'a str,
    pub state: ChatState,
    pub compressed_history: &'a str,
    pub recent: &'a [ChatMessage],
    pub batch: &'a [ChatMessage],
    pub global_emotion: &'a EmotionState,
    pub tendencies: &'a [(String, EmotionState)],
    pub mem_history: &'a [String],
    pub chat_summary: &'a str,
}

pub struct ReplyPromptInput<'a> {
    pub name: &'a str,
    pub role: &'a str,
    pub state: ChatState,
    pub compressed_history: &'a str,
    pub recent: &'a [ChatMessage],
    pub batch: &'a [ChatMessage],
    pub global_emotion: &'a EmotionState,
    pub tendencies: &'a [(String, EmotionState)],
    pub mem_history: &'a [String],
    pub chat_summary: &'a str,
    pub last_response: &'a [ChatMessage],
}

fn messages_json(messages: &[ChatMessage]) -> String {
    serde_json::Value::Array(
        messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "user_name": m.user_name,
                    "content": m.content,
                })
            })
            .collect(),
    )
    .to_string()
}

fn emotion_json(emotion: &EmotionState) -> String {
    serde_json::json!({
        "valence": emotion.valence,
        "arousal": emotion.arousal,
        "dominance": emotion.dominance,
    })
    .to_string()
}

fn tendencies_json(tendencies: &[(String, EmotionState)]) -> String {
    serde_json::Value::Array(
        tendencies
            .iter()
            .map(|(user, emotion)| {
                serde_json::json!({
                    "user_name": user,
                    "emotion_tends_to_user": {
                        "valence": emotion.valence,
                        "arousal": emotion.arousal,
                        "dominance": emotion.dominance,
                    },
                })
            })
            .collect(),
    )
    .to_string()
}

pub fn feedback_prompt(input: &FeedbackPromptInput) -> String {
    format!(
        r#"你是QQ群用户「{name}」（身份设定：{role}），你正在浏览群里刚刚出现的新消息。请以第一人称做出主观判断：更新你的情绪、更新你对群友的印象、续写聊天主题总结，并评估你接下来的聊天意愿。

你的情绪使用 VAD 模型表示，三个维度为：

- valence (愉悦度)：[-1.0, 1.0]
- arousal (唤醒度)：[0.0, 1.0]
- dominance (支配度)：[-1.0, 1.0]

---

## 🧠 你拥有的信息

1. 你当前的聊天状态：{state_code}（0=潜水观察，1=冒泡，2=活跃聊天）

2. 更早消息的压缩记录：

```
{compressed_history}
```

3. 📜 最近的聊天历史：

```json
{recent}
```

4. 💬 当前收到的新消息（共 {batch_len} 条，需逐条打分）：

```json
{batch}
```

5. 🧍 你自己当前的情绪状态：

```json
{emotion}
```

6. 👤 你对在场用户的情感倾向：

```json
{tendencies}
```

7. 🧠 从记忆中联想到的内容（不一定准确）：

```
{mem_history}
```

8. 📝 之前的聊天主题总结：

```
{chat_summary}
```

---

## ✅ 输出格式

只输出下面格式的 JSON，不要任何额外文字、注释或格式标记：

```json
{{
  "new_emotion": {{"valence": 0.1, "arousal": 0.3, "dominance": -0.2}},
  "emotion_tends": [
    {{"valence": 0.1, "arousal": 0.3, "dominance": -0.2}}
  ],
  "summary": "当前聊天主题的总结",
  "analyze_result": [
    "值得长期记住的新信息"
  ],
  "willing": {{"0": 0.1, "1": 0.5, "2": 0.2}}
}}
```

## ⚠ 字段要求

* `new_emotion`：你的最新情绪，三个维度必须落在合法范围内。
* `emotion_tends`：数组长度必须等于新消息条数（{batch_len}），顺序与新消息一致，表示每条消息对其发送者印象的增量。
* `summary`：新的主题总结，必须与之前的总结保持连续性，按实际情况选择下面五种情形之一处理：
  - **断裂**：话题被彻底打断（如突然有人报错求助），总结另起炉灶，但保留一句上一个话题的收尾；
  - **转移**：话题自然过渡（从晚饭聊到了餐馆），总结体现演变脉络；
  - **噪声**：只有零星无关消息（一两个表情包），总结保持原主题不变；
  - **回归**：聊天绕回了更早的话题，总结与早先的记录衔接起来；
  - **混合**：多个话题并行，总结分条并存。
* `analyze_result`：应长期记录的新信息，可以是事件、知识（注明可信度%）、人物关系、你对自己的认知；不要重复已联想到的内容；没有就输出空数组。
* `willing`：你转入各聊天状态的意愿，键固定为 "0"/"1"/"2"，值域 [0.0, 1.0]：
  - "0" 潜水观察：对话与你无关，或你现在不想说话；
  - "1" 冒泡：想表示存在但不想认真参与；
  - "2" 活跃聊天：被 @、被直接提问、或话题强烈吸引你。
"#,
        name = input.name,
        role = input.role,
        state_code = input.state.code(),
        compressed_history = input.compressed_history,
        recent = messages_json(input.recent),
        batch_len = input.batch.len(),
        batch = messages_json(input.batch),
        emotion = emotion_json(input.global_emotion),
        tendencies = tendencies_json(input.tendencies),
        mem_history = input.mem_history.join("\n"),
        chat_summary = input.chat_summary,
    )
}

pub fn reply_prompt(input: &ReplyPromptInput) -> String {
    format!(
        r#"你是QQ群用户「{name}」，不是 AI，而是一个有自我认知的真实用户。你刚刚读完了群里的新消息，现在决定是否发言、发几条、说什么。

你的身份认知是：`{role}`

你当前的聊天状态：{state_code}（{state_desc}）

你当前的情绪状态（VAD 模型）：

```json
{emotion}
```

你对其他用户的情感态度（VAD）：

```json
{tendencies}
```

---

你接收到的新消息列表：

```json
{batch}
```

这些消息与之前的聊天连续，下面是之前的消息历史（无需回复）：

```json
{recent}
```

更早消息的压缩记录：

```
{compressed_history}
```

当前聊天主题总结：

```
{chat_summary}
```

你的联想记忆（非真实记录，只是你对过去的模糊回忆）：

```
{mem_history}
```

上次你发送的消息：

```json
{last_response}
```

---

## ❗状态行为约束

* 当前状态为 1（冒泡）：如果最近的聊天历史里没有你自己的发言，就只回复一条最简单的"正在看群"信号（例如 "👀"），多一个字都不要；如果你最近已经发过言，就什么都不发。
* 当前状态为 2（活跃聊天）：先根据你最近的发言密度决定要不要说话——你刚说过很多话就倾向沉默；要说就简短直接。

⚠ 语言风格限制：

* 不使用旁白（如"(瞥了一眼)"等）。
* 不堆砌无意义回复。
* 不重复自己历史中的用语模板。
* 不复述别人刚说过的话。
* 表情符号使用克制，除非整条回复就是 emoji。

---

请用以下格式作答，仅输出你想发送的回复内容（顺序按你要发的消息顺序）：

```json
{{
  "reply": [
    "（你的回复1）",
    "（你的回复2）"
  ]
}}
```

发空数组表示保持沉默。
"#,
        name = input.name,
        role = input.role,
        state_code = input.state.code(),
        state_desc = input.state.describe(),
        emotion = emotion_json(input.global_emotion),
        tendencies = tendencies_json(input.tendencies),
        batch = messages_json(input.batch),
        recent = messages_json(input.recent),
        compressed_history = input.compressed_history,
        chat_summary = input.chat_summary,
        mem_history = input.mem_history.join("\n"),
        last_response = messages_json(input.last_response),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_feedback_input<'a>(
        batch: &'a [ChatMessage],
        recent: &'a [ChatMessage],
        emotion: &'a EmotionState,
    ) -> FeedbackPromptInput<'a> {
        FeedbackPromptInput {
            name: "喵喵",
            role: "猫娘",
            state: ChatState::Idle,
            compressed_history: "[话题: 吃饭]",
            recent,
            batch,
            global_emotion: emotion,
            tendencies: &[],
            mem_history: &[],
            chat_summary: "大家在聊晚饭",
        }
    }

    #[test]
    fn feedback_prompt_carries_all_context() {
        let batch = vec![ChatMessage::new("alice", "hello")];
        let recent = vec![ChatMessage::new("bob", "earlier")];
        let emotion = EmotionState::new(0.1, 0.2, 0.3);
        let prompt = feedback_prompt(&sample_feedback_input(&batch, &recent, &emotion));

        assert!(prompt.contains("喵喵"));
        assert!(prompt.contains("hello"));
        assert!(prompt.contains("earlier"));
        assert!(prompt.contains("[话题: 吃饭]"));
        assert!(prompt.contains("大家在聊晚饭"));
        assert!(prompt.contains("\"willing\""));
        assert!(prompt.contains("共 1 条"));
    }

    #[test]
    fn feedback_prompt_keeps_the_continuity_exemplars() {
        let batch = vec![ChatMessage::new("a", "x")];
        let emotion = EmotionState::default();
        let prompt = feedback_prompt(&sample_feedback_input(&batch, &[], &emotion));
        for regime in ["断裂", "转移", "噪声", "回归", "混合"] {
            assert!(prompt.contains(regime), "missing continuity regime {}", regime);
        }
    }

    #[test]
    fn reply_prompt_states_the_bubble_constraint() {
        let batch = vec![ChatMessage::new("a", "x")];
        let emotion = EmotionState::default();
        let prompt = reply_prompt(&ReplyPromptInput {
            name: "n",
            role: "r",
            state: ChatState::Bubble,
            compressed_history: "",
            recent: &[],
            batch: &batch,
            global_emotion: &emotion,
            tendencies: &[],
            mem_history: &[],
            chat_summary: "",
            last_response: &[],
        });
        assert!(prompt.contains("👀"));
        assert!(prompt.contains("\"reply\""));
        assert!(prompt.contains("发空数组表示保持沉默"));
    }
}
